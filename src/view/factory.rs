//! View factory: view id → source location → cached compiled view.
//!
//! Each distinct set of active resource-library contracts gets its own
//! cache, created on first use and kept for the factory's lifetime.

use std::fmt;
use std::io;
use std::sync::Arc;

use dashmap::DashMap;

use super::cache::{CacheKey, CompileMode, TemplateCacheRecord, ViewCache};
use super::compiled::CompiledView;
use super::compiler::ViewCompiler;
use super::el::FunctionMapper;
use super::error::{ViewError, ViewResult};
use super::id_mapper::IdAliasMapper;
use super::policy::{ExpiryPolicy, policy_for};
use crate::core::{Clock, Millis, SourceLocation, SystemClock};
use crate::debug;
use crate::lifecycle::RequestContext;
use crate::resource::ResourceResolver;

/// Include path of the diagnostic fragment, honored in development only.
pub const ERROR_VIEW_PATH: &str = "javax.faces.error.xhtml";

const ERROR_VIEW_SOURCE: &str = r##"<div class="vellum-error" xmlns:h="urn:vellum:html">
<h:outputText id="vellumErrorMessage" value="#{errorMessage}"/>
</div>"##;

/// Factory settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    /// 0 compiles on every access, negative never re-checks, positive
    /// re-checks the source at most once per interval.
    pub refresh_ms: Millis,
    /// Shorten generated component ids per view.
    pub short_ids: bool,
    pub trim_comments: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            refresh_ms: 2_000,
            short_ids: true,
            trim_comments: true,
        }
    }
}

pub struct ViewFactory {
    resolver: Arc<dyn ResourceResolver>,
    compiler: ViewCompiler,
    clock: Arc<dyn Clock>,
    options: ViewOptions,
    policy: Arc<dyn ExpiryPolicy>,
    base_cache: Arc<ViewCache>,
    contract_caches: DashMap<String, Arc<ViewCache>>,
    id_mappers: DashMap<String, Arc<IdAliasMapper>>,
    functions: FunctionMapper,
}

impl ViewFactory {
    pub fn new(resolver: Arc<dyn ResourceResolver>, options: ViewOptions) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policy = policy_for(options.refresh_ms, Arc::clone(&resolver), Arc::clone(&clock));
        Self {
            compiler: ViewCompiler::new(options.trim_comments),
            base_cache: Arc::new(ViewCache::new(Arc::clone(&policy))),
            resolver,
            clock,
            options,
            policy,
            contract_caches: DashMap::new(),
            id_mappers: DashMap::new(),
            functions: FunctionMapper::with_builtins(),
        }
    }

    /// Replace the clock. Drops everything cached so far.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.policy = policy_for(self.options.refresh_ms, Arc::clone(&self.resolver), Arc::clone(&clock));
        self.base_cache = Arc::new(ViewCache::new(Arc::clone(&self.policy)));
        self.contract_caches.clear();
        self.clock = clock;
        self
    }

    pub fn with_functions(mut self, functions: FunctionMapper) -> Self {
        self.functions = functions;
        self
    }

    #[inline]
    pub fn resolver(&self) -> &Arc<dyn ResourceResolver> {
        &self.resolver
    }

    #[inline]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[inline]
    pub fn functions(&self) -> &FunctionMapper {
        &self.functions
    }

    #[inline]
    pub fn refresh_ms(&self) -> Millis {
        self.options.refresh_ms
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Location of the view `view_id` under the request's contracts.
    pub fn resolve_view(&self, request: &RequestContext, view_id: &str) -> ViewResult<SourceLocation> {
        self.resolver
            .resolve(view_id, request.contracts())
            .ok_or_else(|| ViewError::SourceNotFound {
                path: view_id.to_string(),
            })
    }

    /// Resolve `path` as seen from `from`: absolute paths go through the
    /// resolver, relative ones are joined onto `from`.
    ///
    /// Either way the result must stay under the resolver's base and
    /// outside the contracts directory.
    pub fn resolve_relative(
        &self,
        request: &RequestContext,
        from: &SourceLocation,
        path: &str,
    ) -> ViewResult<SourceLocation> {
        let not_found = || ViewError::SourceNotFound {
            path: path.to_string(),
        };
        if path.starts_with('/') {
            if self.is_contract_path(path) {
                return Err(ViewError::ContractResource {
                    path: path.to_string(),
                });
            }
            return self.resolve_view(request, path);
        }

        let location = from.join(path).map_err(|_| not_found())?;
        let alias = location.relative_to(self.resolver.base()).ok_or_else(not_found)?;
        if self.is_contract_path(&alias) {
            return Err(ViewError::ContractResource { path: alias });
        }
        Ok(location)
    }

    /// Whether `view_id` resolves to a source (contracts ignored).
    pub fn view_exists(&self, view_id: &str) -> bool {
        self.resolver.resolve(view_id, &[]).is_some()
    }

    /// Whether the view path points into the contracts directory.
    pub fn is_contract_path(&self, path: &str) -> bool {
        let dir = self.resolver.contracts_dir().trim_end_matches('/');
        path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
    }

    /// Whether `location` lies in the contracts directory.
    pub fn is_contract_resource(&self, location: &SourceLocation) -> bool {
        self.is_contract_path(&location.alias_under(self.resolver.base()))
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Full view for `view_id`. Contract resources cannot be requested as
    /// views.
    pub fn get_view(&self, request: &mut RequestContext, view_id: &str) -> ViewResult<Arc<CompiledView>> {
        if self.is_contract_path(view_id) {
            return Err(ViewError::ContractResource {
                path: view_id.to_string(),
            });
        }
        let location = self.resolve_view(request, view_id)?;
        self.view_at(request, &location)
    }

    /// Full view at a resolved location. Publishes its DOCTYPE and XML
    /// declaration into the request.
    pub fn view_at(&self, request: &mut RequestContext, location: &SourceLocation) -> ViewResult<Arc<CompiledView>> {
        let cache = self.cache_for(request.contracts());
        let key = CacheKey::new(location.clone(), CompileMode::Full);
        let view = cache.get(&key, || self.build(location, CompileMode::Full))?;
        if let Some(doctype) = view.doctype() {
            request.set_doctype(doctype);
        }
        if let Some(decl) = view.xml_decl() {
            request.set_xml_decl(decl);
        }
        Ok(view)
    }

    /// The `f:metadata` part of `view_id` only.
    pub fn get_metadata_view(&self, request: &RequestContext, view_id: &str) -> ViewResult<Arc<CompiledView>> {
        if self.is_contract_path(view_id) {
            return Err(ViewError::ContractResource {
                path: view_id.to_string(),
            });
        }
        let location = self.resolve_view(request, view_id)?;
        let key = CacheKey::new(location.clone(), CompileMode::MetadataOnly);
        self.cache_for(request.contracts())
            .get(&key, || self.build(&location, CompileMode::MetadataOnly))
    }

    /// Cache for a contract set; the base cache when none is active.
    pub fn cache_for(&self, contracts: &[String]) -> Arc<ViewCache> {
        if contracts.is_empty() {
            return Arc::clone(&self.base_cache);
        }
        let key = contracts.join(",");
        if let Some(cache) = self.contract_caches.get(&key) {
            return Arc::clone(cache.value());
        }
        let fresh = Arc::new(ViewCache::new(Arc::clone(&self.policy)));
        let cache = self.contract_caches.entry(key).or_insert(fresh);
        Arc::clone(cache.value())
    }

    /// Whether the next lookup of `location` compiles: true unless the
    /// base cache and every contract cache hold it.
    pub fn needs_refresh(&self, location: &SourceLocation) -> bool {
        let key = CacheKey::new(location.clone(), CompileMode::Full);
        !self.base_cache.is_cached(&key)
            || self
                .contract_caches
                .iter()
                .any(|cache| !cache.value().is_cached(&key))
    }

    /// Id mapper shared by every request applying `alias`, if enabled.
    pub fn id_mapper(&self, alias: &str) -> Option<Arc<IdAliasMapper>> {
        if !self.options.short_ids {
            return None;
        }
        let mapper = self.id_mappers.entry(alias.to_string()).or_default();
        Some(Arc::clone(mapper.value()))
    }

    /// The built-in diagnostic fragment, compiled fresh on each use.
    pub fn error_view(&self) -> ViewResult<Arc<CompiledView>> {
        let location = self
            .resolver
            .base()
            .join(ERROR_VIEW_PATH)
            .map_err(|_| ViewError::SourceNotFound {
                path: ERROR_VIEW_PATH.to_string(),
            })?;
        let alias = format!("/{ERROR_VIEW_PATH}");
        let program = self.compiler.compile(ERROR_VIEW_SOURCE, &alias, CompileMode::Full)?;
        Ok(Arc::new(CompiledView::new(
            program,
            location,
            alias,
            self.clock.now_millis(),
            -1,
            CompileMode::Full,
        )))
    }

    fn build(&self, location: &SourceLocation, mode: CompileMode) -> ViewResult<TemplateCacheRecord> {
        let alias = location.alias_under(self.resolver.base());
        let refresh_ms = self.options.refresh_ms;
        // stat before reading so a write racing the read shows as modified
        let last_modified = if refresh_ms > 0 {
            self.resolver.last_modified(location)
        } else {
            0
        };
        let source = self.resolver.read(location).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ViewError::SourceNotFound { path: alias.clone() },
            _ => ViewError::Io {
                path: location.to_string(),
                source: e,
            },
        })?;

        let created_at = self.clock.now_millis();
        let program = self.compiler.compile(&source, &alias, mode)?;
        debug!("view"; "compiled {} ({}) @{}", alias, mode.as_str(), created_at);
        let view = CompiledView::new(program, location.clone(), alias, created_at, refresh_ms, mode);
        Ok(TemplateCacheRecord::new(
            Arc::new(view),
            created_at,
            last_modified,
            refresh_ms,
        ))
    }
}

impl fmt::Debug for ViewFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewFactory")
            .field("base", &self.resolver.base().as_str())
            .field("options", &self.options)
            .field("contract_caches", &self.contract_caches.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::lifecycle::Request;
    use crate::resource::MemoryResolver;
    use crate::tree::ComponentTree;

    fn factory(refresh_ms: Millis) -> (Arc<MemoryResolver>, Arc<ManualClock>, ViewFactory) {
        let resolver = Arc::new(MemoryResolver::new());
        let clock = Arc::new(ManualClock::new(0));
        let options = ViewOptions {
            refresh_ms,
            ..ViewOptions::default()
        };
        let factory = ViewFactory::new(resolver.clone(), options).with_clock(clock.clone());
        (resolver, clock, factory)
    }

    fn request(view_id: &str) -> RequestContext {
        RequestContext::new(Request::get(view_id))
    }

    fn render(factory: &ViewFactory, view: &Arc<CompiledView>) -> serde_json::Value {
        let mut tree = ComponentTree::new(view.alias());
        let mut request = request(view.alias());
        let root = tree.root();
        view.apply(factory, &mut request, &mut tree, root).unwrap();
        tree.to_json()
    }

    #[test]
    fn test_never_refresh_keeps_first_compilation() {
        let (resolver, clock, factory) = factory(-1);
        resolver.insert("/a.xhtml", "<p>one</p>", 1);
        let mut req = request("/a.xhtml");
        let first = factory.get_view(&mut req, "/a.xhtml").unwrap();

        resolver.insert("/a.xhtml", "<p>two</p>", 2);
        clock.advance(60_000);
        for _ in 0..3 {
            let again = factory.get_view(&mut req, "/a.xhtml").unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert!(render(&factory, &first).to_string().contains("one"));
        assert_eq!(resolver.read_count(), 1);
    }

    #[test]
    fn test_always_refresh_compiles_every_time() {
        let (resolver, clock, factory) = factory(0);
        resolver.insert("/a.xhtml", "<p>one</p>", 1);
        let mut req = request("/a.xhtml");
        let first = factory.get_view(&mut req, "/a.xhtml").unwrap();
        let location = factory.resolve_view(&req, "/a.xhtml").unwrap();
        assert!(!factory.cache_for(&[]).is_cached(&CacheKey::new(location.clone(), CompileMode::Full)));

        clock.advance(1);
        resolver.insert("/a.xhtml", "<p>two</p>", 2);
        let second = factory.get_view(&mut req, "/a.xhtml").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(render(&factory, &second).to_string().contains("two"));
        assert!(factory.needs_refresh(&location));
    }

    #[test]
    fn test_periodic_refresh() {
        let (resolver, clock, factory) = factory(1_000);
        resolver.insert("/a.xhtml", "<p>one</p>", 100);
        let mut req = request("/a.xhtml");
        let first = factory.get_view(&mut req, "/a.xhtml").unwrap();

        clock.set(500);
        assert!(Arc::ptr_eq(&first, &factory.get_view(&mut req, "/a.xhtml").unwrap()));

        // due but unmodified
        clock.set(1_500);
        assert!(Arc::ptr_eq(&first, &factory.get_view(&mut req, "/a.xhtml").unwrap()));

        resolver.insert("/a.xhtml", "<p>two</p>", 200);
        clock.set(2_600);
        let second = factory.get_view(&mut req, "/a.xhtml").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.created_at(), 2_600);
        assert!(render(&factory, &second).to_string().contains("two"));
    }

    #[test]
    fn test_concurrent_lookups_agree() {
        let (resolver, _clock, factory) = factory(-1);
        resolver.insert("/a.xhtml", r#"<p xmlns:h="urn:h"><h:panel id="x">hi</h:panel></p>"#, 1);

        let views: Vec<Arc<CompiledView>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut req = request("/a.xhtml");
                        factory.get_view(&mut req, "/a.xhtml").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(resolver.read_count(), 1);
        let expected = render(&factory, &views[0]);
        for view in &views {
            assert_eq!(view.alias(), "/a.xhtml");
            assert_eq!(render(&factory, view), expected);
        }
    }

    #[test]
    fn test_missing_and_contract_views() {
        let (resolver, _clock, factory) = factory(-1);
        resolver.insert("/contracts/blue/a.xhtml", "<p>blue</p>", 1);
        resolver.insert("/a.xhtml", "<p>plain</p>", 1);
        let mut req = request("/a.xhtml");

        let err = factory.get_view(&mut req, "/missing.xhtml").unwrap_err();
        assert!(err.is_not_found());

        let err = factory.get_view(&mut req, "/contracts/blue/a.xhtml").unwrap_err();
        assert!(matches!(err, ViewError::ContractResource { .. }));

        let location = resolver.location("/contracts/blue/a.xhtml");
        assert!(factory.is_contract_resource(&location));
        assert!(!factory.is_contract_resource(&resolver.location("/a.xhtml")));
        assert!(factory.view_exists("/a.xhtml"));
        assert!(!factory.view_exists("/b.xhtml"));
    }

    #[test]
    fn test_contract_sets_get_separate_caches() {
        let (resolver, _clock, factory) = factory(-1);
        resolver.insert("/contracts/blue/a.xhtml", "<p>blue</p>", 1);
        resolver.insert("/a.xhtml", "<p>plain</p>", 1);

        let mut plain = request("/a.xhtml");
        let mut blue = request("/a.xhtml").with_contracts(vec!["blue".into()]);
        let plain_view = factory.get_view(&mut plain, "/a.xhtml").unwrap();
        let blue_view = factory.get_view(&mut blue, "/a.xhtml").unwrap();

        assert_eq!(plain_view.alias(), "/a.xhtml");
        assert_eq!(blue_view.alias(), "/contracts/blue/a.xhtml");
        let a = factory.cache_for(&["blue".to_string()]);
        let b = factory.cache_for(&["blue".to_string()]);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &factory.cache_for(&[])));
    }

    #[test]
    fn test_doctype_is_published() {
        let (resolver, _clock, factory) = factory(-1);
        resolver.insert("/a.xhtml", "<!DOCTYPE html>\n<html/>", 1);
        let mut req = request("/a.xhtml");
        factory.get_view(&mut req, "/a.xhtml").unwrap();
        assert_eq!(req.doctype(), Some("<!DOCTYPE html>"));

        // published again on a cache hit
        let mut again = request("/a.xhtml");
        factory.get_view(&mut again, "/a.xhtml").unwrap();
        assert_eq!(again.doctype(), Some("<!DOCTYPE html>"));
    }

    #[test]
    fn test_templates_and_includes() {
        let (resolver, _clock, factory) = factory(-1);
        resolver.insert(
            "/layout.xhtml",
            r#"<html xmlns:ui="urn:ui"><title><ui:insert name="title">Default</ui:insert></title><ui:insert name="body"/><ui:include src="footer.xhtml"><ui:param name="year" value="2024"/></ui:include></html>"#,
            1,
        );
        resolver.insert("/footer.xhtml", "<footer>(c) #{year}</footer>", 1);
        resolver.insert(
            "/page.xhtml",
            r#"<ui:composition xmlns:ui="urn:ui" template="/layout.xhtml"><ui:define name="body"><p>Hello #{param.who}</p></ui:define></ui:composition>"#,
            1,
        );

        let mut req = RequestContext::new(Request::get("/page.xhtml").with_param("who", "<ada>"));
        let view = factory.get_view(&mut req, "/page.xhtml").unwrap();
        let mut tree = ComponentTree::new("/page.xhtml");
        let root = tree.root();
        view.apply(&factory, &mut req, &mut tree, root).unwrap();

        let text: String = tree
            .visit(root)
            .into_iter()
            .filter_map(|id| tree.get(id).and_then(|n| n.text.clone()))
            .collect();
        assert_eq!(
            text,
            "<html><title>Default</title><p>Hello &lt;ada&gt;</p><footer>(c) 2024</footer></html>"
        );
    }

    #[test]
    fn test_metadata_view() {
        let (resolver, _clock, factory) = factory(-1);
        resolver.insert(
            "/a.xhtml",
            r#"<html xmlns:f="urn:f" xmlns:h="urn:h"><f:metadata><h:viewParam name="id"/></f:metadata><p/></html>"#,
            1,
        );
        resolver.insert("/b.xhtml", "<p/>", 1);
        let req = request("/a.xhtml");

        let meta = factory.get_metadata_view(&req, "/a.xhtml").unwrap();
        assert_eq!(meta.mode(), CompileMode::MetadataOnly);
        let mut tree = ComponentTree::new("/a.xhtml");
        let root = tree.root();
        let mut req = request("/a.xhtml");
        meta.apply(&factory, &mut req, &mut tree, root).unwrap();
        assert!(tree.has_metadata());
        assert!(tree.children(root).is_empty());

        let empty = factory.get_metadata_view(&req, "/b.xhtml").unwrap();
        let mut tree = ComponentTree::new("/b.xhtml");
        let root = tree.root();
        empty.apply(&factory, &mut req, &mut tree, root).unwrap();
        assert!(!tree.has_metadata());
    }
}
