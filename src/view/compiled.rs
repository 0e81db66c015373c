//! Compiled views and the apply / include protocol.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::cache::CompileMode;
use super::compiler::{CompiledProgram, Handler, apply_all};
use super::context::{ApplyState, ViewEvaluationContext};
use super::error::ViewResult;
use super::factory::{ERROR_VIEW_PATH, ViewFactory};
use crate::core::{Millis, SourceLocation};
use crate::lifecycle::RequestContext;
use crate::log;
use crate::tree::{ApplyToken, ComponentTree, NodeId, finalize_for_deletion, mark_for_deletion};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one compiled view instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewKey(u64);

impl ViewKey {
    fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Executable program built from one template source.
///
/// Immutable once constructed, so a view handed to one request stays valid
/// after the cache replaced it.
pub struct CompiledView {
    key: ViewKey,
    program: Vec<Handler>,
    location: SourceLocation,
    alias: String,
    created_at: Millis,
    refresh_ms: Millis,
    doctype: Option<String>,
    xml_decl: Option<String>,
    mode: CompileMode,
}

impl CompiledView {
    pub(crate) fn new(
        program: CompiledProgram,
        location: SourceLocation,
        alias: impl Into<String>,
        created_at: Millis,
        refresh_ms: Millis,
        mode: CompileMode,
    ) -> Self {
        Self {
            key: ViewKey::next(),
            program: program.handlers,
            location,
            alias: alias.into(),
            created_at,
            refresh_ms,
            doctype: program.doctype,
            xml_decl: program.xml_decl,
            mode,
        }
    }

    /// A view with an empty program.
    #[cfg(test)]
    pub(crate) fn empty(location: SourceLocation, alias: &str, created_at: Millis, refresh_ms: Millis) -> Self {
        Self::new(
            CompiledProgram::default(),
            location,
            alias,
            created_at,
            refresh_ms,
            CompileMode::Full,
        )
    }

    #[inline]
    pub fn key(&self) -> ViewKey {
        self.key
    }

    #[inline]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[inline]
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    #[inline]
    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    #[inline]
    pub fn refresh_ms(&self) -> Millis {
        self.refresh_ms
    }

    pub fn doctype(&self) -> Option<&str> {
        self.doctype.as_deref()
    }

    pub fn xml_decl(&self) -> Option<&str> {
        self.xml_decl.as_deref()
    }

    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    /// Build or refresh the subtree of `parent`.
    ///
    /// Binds the id mapper for this alias unless the request already has
    /// one, and unbinds it afterwards. Children the program no longer
    /// produces are removed.
    pub fn apply(
        self: &Arc<Self>,
        factory: &ViewFactory,
        request: &mut RequestContext,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        let mapper = match request.id_mapper() {
            Some(_) => None,
            None => factory.id_mapper(&self.alias),
        };
        let bound_here = mapper.is_some();
        if bound_here {
            request.set_id_mapper(mapper);
        }

        let mut state = ApplyState::new();
        let result = {
            let mut ctx = ViewEvaluationContext::new(factory, request, &mut state, Arc::clone(self));
            let now = ctx.now();
            self.refresh(tree, parent);
            mark_for_deletion(tree, parent);
            let applied = apply_all(&self.program, &mut ctx, tree, parent);
            if applied.is_ok() {
                finalize_for_deletion(tree, parent);
                self.mark_applied(now, tree, parent);
            }
            applied
        };

        if bound_here {
            request.set_id_mapper(None);
        }
        result
    }

    /// Apply this view as an include of the view running in `ctx`.
    pub fn include(
        self: &Arc<Self>,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
    ) -> ViewResult<()> {
        self.refresh(tree, parent);
        {
            let mut nested = ctx.nested(Arc::clone(self));
            apply_all(&self.program, &mut nested, tree, parent)?;
        }
        self.mark_applied(ctx.now(), tree, parent);
        Ok(())
    }

    /// Include the view at `path`: absolute paths resolve through the
    /// factory, relative ones against this view's location.
    pub fn include_path(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
        path: &str,
    ) -> ViewResult<()> {
        let factory = ctx.factory();
        if path == ERROR_VIEW_PATH {
            if !ctx.request().stage().is_development() {
                return Ok(());
            }
            let view = factory.error_view()?;
            return view.include(ctx, tree, parent);
        }

        let location = factory.resolve_relative(ctx.request(), &self.location, path)?;
        let view = factory.view_at(ctx.request_mut(), &location)?;
        view.include(ctx, tree, parent)
    }

    /// Drop children produced by an older compilation of this alias.
    fn refresh(&self, tree: &mut ComponentTree, parent: NodeId) {
        if self.refresh_ms <= 0 {
            return;
        }
        for id in tree.facets_and_children(parent) {
            let Some(node) = tree.get(id) else {
                continue;
            };
            if node.transient {
                continue;
            }
            if let Some(token) = &node.applied
                && token.is_stale_for(&self.alias, self.created_at)
            {
                log!(
                    "view";
                    "{} was modified @{}, flushing component applied @{}",
                    self.alias,
                    self.created_at,
                    token.expires_at
                );
                tree.remove(id);
            }
        }
    }

    /// Tag untagged children with this alias and their expiry.
    fn mark_applied(&self, now: Millis, tree: &mut ComponentTree, parent: NodeId) {
        if self.refresh_ms <= 0 {
            return;
        }
        let token = ApplyToken::new(self.alias.as_str(), now.saturating_add(self.refresh_ms));
        for id in tree.facets_and_children(parent) {
            if let Some(node) = tree.get_mut(id)
                && !node.transient
                && node.applied.is_none()
            {
                node.applied = Some(token.clone());
            }
        }
    }
}

impl fmt::Debug for CompiledView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledView")
            .field("alias", &self.alias)
            .field("location", &self.location.as_str())
            .field("created_at", &self.created_at)
            .field("mode", &self.mode)
            .field("handlers", &self.program.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::lifecycle::Request;
    use crate::resource::{FsResolver, MemoryResolver};
    use crate::view::ViewOptions;
    use crate::view::ViewError;

    const NS: &str = r#"xmlns:ui="urn:ui" xmlns:h="urn:h" xmlns:f="urn:f""#;

    struct Fixture {
        resolver: Arc<MemoryResolver>,
        clock: Arc<ManualClock>,
        factory: ViewFactory,
    }

    fn fixture(refresh_ms: Millis) -> Fixture {
        let resolver = Arc::new(MemoryResolver::new());
        let clock = Arc::new(ManualClock::new(0));
        let options = ViewOptions {
            refresh_ms,
            ..ViewOptions::default()
        };
        let factory = ViewFactory::new(resolver.clone(), options).with_clock(clock.clone());
        Fixture {
            resolver,
            clock,
            factory,
        }
    }

    fn apply(fx: &Fixture, tree: &mut ComponentTree, view_id: &str) -> Arc<CompiledView> {
        let mut request = RequestContext::new(Request::get(view_id));
        let view = fx.factory.get_view(&mut request, view_id).unwrap();
        let root = tree.root();
        view.apply(&fx.factory, &mut request, tree, root).unwrap();
        view
    }

    fn ids(tree: &ComponentTree) -> Vec<String> {
        tree.children(tree.root())
            .iter()
            .filter_map(|id| tree.get(*id).and_then(|n| n.id.clone()))
            .collect()
    }

    #[test]
    fn test_stale_children_are_pruned() {
        let fx = fixture(1_000);
        fx.resolver.insert(
            "/p.xhtml",
            format!(r#"<div {NS}><h:outputText id="x"/><h:outputText id="y"/></div>"#),
            10,
        );
        let mut tree = ComponentTree::new("/p.xhtml");
        apply(&fx, &mut tree, "/p.xhtml");
        assert!(ids(&tree).contains(&"x".to_string()));
        let x = tree.find_by_id("x").unwrap();
        assert_eq!(tree.get(x).unwrap().applied, Some(ApplyToken::new("/p.xhtml", 1_000)));

        // a newer compilation that no longer produces x
        fx.clock.set(2_000);
        fx.resolver.insert("/p.xhtml", format!(r#"<div {NS}><h:outputText id="y"/></div>"#), 20);
        let view = apply(&fx, &mut tree, "/p.xhtml");
        assert_eq!(view.created_at(), 2_000);
        assert!(!ids(&tree).contains(&"x".to_string()));
        assert!(ids(&tree).contains(&"y".to_string()));

        // the same program again keeps y, now tagged by the new generation
        fx.clock.set(2_500);
        apply(&fx, &mut tree, "/p.xhtml");
        let y = tree.find_by_id("y").unwrap();
        assert!(tree.get(y).unwrap().applied.as_ref().unwrap().expires_at >= 3_000);
    }

    #[test]
    fn test_reapply_reuses_nodes() {
        let fx = fixture(-1);
        fx.resolver.insert("/p.xhtml", format!(r#"<p {NS}>a<h:panel id="x">b</h:panel></p>"#), 1);
        let mut tree = ComponentTree::new("/p.xhtml");
        apply(&fx, &mut tree, "/p.xhtml");
        let before = tree.find_by_id("x").unwrap();
        let count = tree.len();

        apply(&fx, &mut tree, "/p.xhtml");
        assert_eq!(tree.find_by_id("x"), Some(before));
        assert_eq!(tree.len(), count);
        // nothing is tagged without periodic refresh
        assert!(tree.get(before).unwrap().applied.is_none());
    }

    #[test]
    fn test_transient_children_are_not_tagged() {
        let fx = fixture(1_000);
        fx.resolver.insert(
            "/p.xhtml",
            format!(r#"<p {NS}><h:outputText id="t" transient="true"/></p>"#),
            1,
        );
        let mut tree = ComponentTree::new("/p.xhtml");
        apply(&fx, &mut tree, "/p.xhtml");
        let t = tree.find_by_id("t").unwrap();
        assert!(tree.get(t).unwrap().transient);
        assert!(tree.get(t).unwrap().applied.is_none());
    }

    #[test]
    fn test_id_mapper_is_bound_only_during_apply() {
        let fx = fixture(-1);
        fx.resolver.insert("/p.xhtml", format!(r#"<p {NS}><h:outputText value="v"/></p>"#), 1);
        let mut tree = ComponentTree::new("/p.xhtml");
        let mut request = RequestContext::new(Request::get("/p.xhtml"));
        let view = fx.factory.get_view(&mut request, "/p.xhtml").unwrap();
        let root = tree.root();
        view.apply(&fx.factory, &mut request, &mut tree, root).unwrap();
        assert!(request.id_mapper().is_none());

        let generated: Vec<_> = tree
            .visit(root)
            .into_iter()
            .filter_map(|id| tree.get(id).and_then(|n| n.id.clone()))
            .collect();
        assert!(!generated.is_empty());
        assert!(generated.iter().all(|id| id.starts_with('j') && id.len() <= 3));
    }

    fn try_apply(fx: &Fixture, view_id: &str) -> ViewResult<ComponentTree> {
        let mut tree = ComponentTree::new(view_id);
        let mut request = RequestContext::new(Request::get(view_id));
        let view = fx.factory.get_view(&mut request, view_id)?;
        let root = tree.root();
        view.apply(&fx.factory, &mut request, &mut tree, root)?;
        Ok(tree)
    }

    #[test]
    fn test_relative_include_of_sibling() {
        let fx = fixture(-1);
        fx.resolver.insert("/pages/p.xhtml", format!(r#"<p {NS}><ui:include src="nav.xhtml"/></p>"#), 1);
        fx.resolver.insert("/pages/nav.xhtml", "<nav>links</nav>", 1);

        let tree = try_apply(&fx, "/pages/p.xhtml").unwrap();
        assert!(tree.to_json().to_string().contains("links"));
    }

    #[test]
    fn test_relative_include_into_contracts_is_rejected() {
        let fx = fixture(-1);
        fx.resolver.insert("/p.xhtml", format!(r#"<p {NS}><ui:include src="contracts/blue/x.xhtml"/></p>"#), 1);
        fx.resolver.insert("/contracts/blue/x.xhtml", "<b>contract</b>", 1);

        let err = try_apply(&fx, "/p.xhtml").unwrap_err();
        assert!(matches!(err, ViewError::ContractResource { ref path } if path == "/contracts/blue/x.xhtml"));
    }

    #[test]
    fn test_absolute_include_into_contracts_is_rejected() {
        let fx = fixture(-1);
        fx.resolver.insert("/p.xhtml", format!(r#"<p {NS}><ui:include src="/contracts/blue/x.xhtml"/></p>"#), 1);
        fx.resolver.insert("/contracts/blue/x.xhtml", "<b>contract</b>", 1);

        let err = try_apply(&fx, "/p.xhtml").unwrap_err();
        assert!(matches!(err, ViewError::ContractResource { .. }));
    }

    #[test]
    fn test_relative_include_cannot_leave_root() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("site");
        std::fs::create_dir_all(&site).unwrap();
        std::fs::write(dir.path().join("secret.xhtml"), "<p>hidden</p>").unwrap();
        std::fs::write(
            site.join("p.xhtml"),
            format!(r#"<p {NS}><ui:include src="../secret.xhtml"/></p>"#),
        )
        .unwrap();
        std::fs::write(
            site.join("q.xhtml"),
            format!(r#"<p {NS}><ui:include src="${{param.x}}"/></p>"#),
        )
        .unwrap();

        let resolver = Arc::new(FsResolver::new(&site).unwrap());
        let factory = ViewFactory::new(resolver, ViewOptions::default());

        let mut tree = ComponentTree::new("/p.xhtml");
        let mut request = RequestContext::new(Request::get("/p.xhtml"));
        let view = factory.get_view(&mut request, "/p.xhtml").unwrap();
        let root = tree.root();
        let err = view.apply(&factory, &mut request, &mut tree, root).unwrap_err();
        assert!(err.is_not_found());
        assert!(!tree.to_json().to_string().contains("hidden"));

        // the same escape through request data
        let mut tree = ComponentTree::new("/q.xhtml");
        let mut request = RequestContext::new(Request::get("/q.xhtml").with_param("x", "../secret.xhtml"));
        let view = factory.get_view(&mut request, "/q.xhtml").unwrap();
        let root = tree.root();
        let err = view.apply(&factory, &mut request, &mut tree, root).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_view_only_in_development() {
        let fx = fixture(-1);
        fx.resolver.insert(
            "/p.xhtml",
            format!(r#"<p {NS}><ui:include src="{ERROR_VIEW_PATH}"/></p>"#),
            1,
        );

        let mut tree = ComponentTree::new("/p.xhtml");
        apply(&fx, &mut tree, "/p.xhtml");
        let production = tree.len();

        let mut tree = ComponentTree::new("/p.xhtml");
        let mut request = RequestContext::new(Request::get("/p.xhtml"))
            .with_stage(crate::core::ProjectStage::Development);
        let view = fx.factory.get_view(&mut request, "/p.xhtml").unwrap();
        let root = tree.root();
        view.apply(&fx.factory, &mut request, &mut tree, root).unwrap();
        assert!(tree.len() > production);
    }
}
