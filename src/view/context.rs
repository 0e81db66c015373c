//! Per-apply evaluation context.
//!
//! A top-level [`CompiledView::apply`] creates one [`ApplyState`] and a root
//! [`ViewEvaluationContext`]. Every include or template-client call derives
//! a nested context that extends the view hierarchy but shares the state:
//! id counters, prefixes, the client stack and the variable scopes.
//!
//! [`CompiledView::apply`]: super::CompiledView::apply

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};

use super::CompiledView;
use super::client::{ClientHandle, ClientStack, NULL_DEFINITION, TemplateClient};
use super::el::{ValueExpr, VariableResolver};
use super::error::ViewResult;
use super::factory::ViewFactory;
use crate::core::Millis;
use crate::lifecycle::RequestContext;
use crate::tree::{ComponentTree, NodeId};

/// State shared by every context of one top-level apply.
#[derive(Debug, Default)]
pub struct ApplyState {
    ids: FxHashMap<String, u32>,
    prefixes: FxHashMap<u64, u32>,
    clients: ClientStack,
    scopes: Vec<FxHashMap<String, String>>,
}

impl ApplyState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Evaluation context threaded through the handlers of a compiled view.
pub struct ViewEvaluationContext<'a> {
    factory: &'a ViewFactory,
    request: &'a mut RequestContext,
    state: &'a mut ApplyState,
    hierarchy: Vec<Arc<CompiledView>>,
    prefix: Option<String>,
}

impl<'a> ViewEvaluationContext<'a> {
    pub fn new(
        factory: &'a ViewFactory,
        request: &'a mut RequestContext,
        state: &'a mut ApplyState,
        view: Arc<CompiledView>,
    ) -> Self {
        Self {
            factory,
            request,
            state,
            hierarchy: vec![view],
            prefix: None,
        }
    }

    /// Context for `view` nested in this one.
    pub fn nested(&mut self, view: Arc<CompiledView>) -> ViewEvaluationContext<'_> {
        let mut hierarchy = Vec::with_capacity(self.hierarchy.len() + 1);
        hierarchy.extend(self.hierarchy.iter().cloned());
        hierarchy.push(view);
        ViewEvaluationContext {
            factory: self.factory,
            request: &mut *self.request,
            state: &mut *self.state,
            hierarchy,
            prefix: None,
        }
    }

    /// The view whose handlers are running.
    pub fn view(&self) -> &Arc<CompiledView> {
        // hierarchy is never empty
        &self.hierarchy[self.hierarchy.len() - 1]
    }

    pub fn hierarchy(&self) -> &[Arc<CompiledView>] {
        &self.hierarchy
    }

    #[inline]
    pub fn factory(&self) -> &'a ViewFactory {
        self.factory
    }

    pub fn request(&self) -> &RequestContext {
        &*self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestContext {
        &mut *self.request
    }

    pub fn now(&self) -> Millis {
        self.factory.clock().now_millis()
    }

    // ========================================================================
    // Unique ids
    // ========================================================================

    /// Deterministic id for `base`: `prefix_base`, then `prefix_base_1`, ...
    ///
    /// The prefix hashes the aliases of the view hierarchy; a hierarchy
    /// seen before in this apply gets `hash_1`, `hash_2`, ...
    pub fn generate_unique_id(&mut self, base: &str) -> String {
        if self.prefix.is_none() {
            let mut hasher = FxHasher::default();
            for view in &self.hierarchy {
                view.alias().hash(&mut hasher);
            }
            let hash = hasher.finish();
            let prefix = match self.state.prefixes.get_mut(&hash) {
                None => {
                    self.state.prefixes.insert(hash, 0);
                    format!("{hash:x}")
                }
                Some(count) => {
                    *count += 1;
                    format!("{hash:x}_{count}")
                }
            };
            self.prefix = Some(prefix);
        }
        let prefix = self.prefix.as_deref().unwrap_or_default();

        match self.state.ids.get_mut(base) {
            None => {
                self.state.ids.insert(base.to_string(), 0);
                format!("{prefix}_{base}")
            }
            Some(count) => {
                *count += 1;
                format!("{prefix}_{base}_{count}")
            }
        }
    }

    /// Component id for a node created under `mark`, shortened when an id
    /// mapper is bound to the request.
    pub fn component_id(&self, mark: &str) -> String {
        let id = format!("j_id{mark}");
        match self.request.id_mapper() {
            Some(mapper) => mapper.alias_for(&id),
            None => id,
        }
    }

    // ========================================================================
    // Template clients
    // ========================================================================

    /// Register `client` with the highest priority.
    pub fn push_client(&mut self, client: Arc<dyn TemplateClient>) -> ClientHandle {
        let owner = Arc::clone(self.view());
        self.state.clients.push(owner, client)
    }

    /// Register `client` with the lowest priority.
    pub fn extend_client(&mut self, client: Arc<dyn TemplateClient>) -> ClientHandle {
        let owner = Arc::clone(self.view());
        self.state.clients.extend(owner, client)
    }

    pub fn pop_client(&mut self, handle: ClientHandle) -> ViewResult<()> {
        self.state.clients.pop(handle)
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.len()
    }

    /// Ask the registered clients, in priority order, to apply the
    /// definition `name` under `parent`. Clients owned by the running view
    /// are skipped, and a client already resolving `name` answers "not
    /// found".
    pub fn include_definition(
        &mut self,
        tree: &mut ComponentTree,
        parent: NodeId,
        name: Option<&str>,
    ) -> ViewResult<bool> {
        let key = name.unwrap_or(NULL_DEFINITION);
        let current = self.view().key();
        let candidates: Vec<_> = self
            .state
            .clients
            .frames()
            .iter()
            .filter(|frame| frame.owner.key() != current)
            .map(|frame| {
                (
                    frame.handle,
                    Arc::clone(&frame.owner),
                    Arc::clone(&frame.client),
                )
            })
            .collect();

        for (handle, owner, client) in candidates {
            // popped by an earlier client
            let Some(frame) = self.state.clients.get_mut(handle) else {
                continue;
            };
            if !frame.resolving.insert(key.to_string()) {
                continue;
            }

            let found = {
                let mut nested = self.nested(owner);
                client.apply_definition(&mut nested, tree, parent, name)
            };

            if let Some(frame) = self.state.clients.get_mut(handle) {
                frame.resolving.remove(key);
            }
            if found? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Open a variable scope; variables set until the matching
    /// [`pop_scope`](Self::pop_scope) shadow outer ones.
    pub fn push_scope(&mut self) {
        self.state.scopes.push(FxHashMap::default());
    }

    pub fn pop_scope(&mut self) {
        self.state.scopes.pop();
    }

    /// Set a variable in the innermost scope (the request when none is open).
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        match self.state.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.into(), value.into());
            }
            None => self.request.set_attribute(name, value),
        }
    }

    pub fn evaluate(&self, expr: &ValueExpr) -> ViewResult<String> {
        expr.evaluate(self, self.factory.functions(), false)
    }

    /// Evaluate for markup output: expression results are escaped.
    pub fn evaluate_markup(&self, expr: &ValueExpr) -> ViewResult<String> {
        expr.evaluate(self, self.factory.functions(), true)
    }

    // ========================================================================
    // Includes
    // ========================================================================

    /// Include the view at `path`, relative to the running view.
    pub fn include_path(&mut self, tree: &mut ComponentTree, parent: NodeId, path: &str) -> ViewResult<()> {
        let view = Arc::clone(self.view());
        view.include_path(self, tree, parent, path)
    }
}

impl VariableResolver for ViewEvaluationContext<'_> {
    /// Innermost scope first, then request attributes, then `param.*`.
    fn resolve_variable(&self, name: &str) -> Option<String> {
        self.state
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
            .or_else(|| self.request.attribute(name).map(str::to_string))
            .or_else(|| {
                let param = name.strip_prefix("param.")?;
                self.request.request().param(param).map(str::to_string)
            })
    }
}
