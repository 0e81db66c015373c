//! Template clients and the client stack.
//!
//! A template client supplies named fragments to `ui:insert`. Clients are
//! registered on a per-apply stack: pushed clients take priority, extended
//! clients are consulted last. Frames are addressed by [`ClientHandle`]
//! rather than by client identity.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use super::CompiledView;
use super::context::ViewEvaluationContext;
use super::error::{ViewError, ViewResult};
use crate::tree::{ComponentTree, NodeId};

/// Name under which requests for the unnamed definition are tracked.
pub const NULL_DEFINITION: &str = "facelets._NULL_DEF_";

/// Supplies named template fragments.
pub trait TemplateClient: Send + Sync + fmt::Debug {
    /// Apply the definition called `name` (`None` for the unnamed body)
    /// under `parent`. Returns whether this client had it.
    fn apply_definition(
        &self,
        ctx: &mut ViewEvaluationContext<'_>,
        tree: &mut ComponentTree,
        parent: NodeId,
        name: Option<&str>,
    ) -> ViewResult<bool>;
}

/// Stable key of one stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(u64);

impl ClientHandle {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub(crate) struct ClientFrame {
    pub handle: ClientHandle,
    pub owner: Arc<CompiledView>,
    pub client: Arc<dyn TemplateClient>,
    /// Definition names this frame is resolving right now.
    pub resolving: FxHashSet<String>,
}

/// Ordered client frames, highest priority first.
#[derive(Debug, Default)]
pub(crate) struct ClientStack {
    frames: Vec<ClientFrame>,
    next: u64,
}

impl ClientStack {
    fn frame(&mut self, owner: Arc<CompiledView>, client: Arc<dyn TemplateClient>) -> ClientFrame {
        self.next += 1;
        ClientFrame {
            handle: ClientHandle(self.next),
            owner,
            client,
            resolving: FxHashSet::default(),
        }
    }

    /// Insert at the front.
    pub fn push(&mut self, owner: Arc<CompiledView>, client: Arc<dyn TemplateClient>) -> ClientHandle {
        let frame = self.frame(owner, client);
        let handle = frame.handle;
        self.frames.insert(0, frame);
        handle
    }

    /// Append at the back.
    pub fn extend(&mut self, owner: Arc<CompiledView>, client: Arc<dyn TemplateClient>) -> ClientHandle {
        let frame = self.frame(owner, client);
        let handle = frame.handle;
        self.frames.push(frame);
        handle
    }

    pub fn pop(&mut self, handle: ClientHandle) -> ViewResult<()> {
        let pos = self
            .frames
            .iter()
            .position(|f| f.handle == handle)
            .ok_or(ViewError::TemplateClientNotFound { handle: handle.0 })?;
        self.frames.remove(pos);
        Ok(())
    }

    pub fn get_mut(&mut self, handle: ClientHandle) -> Option<&mut ClientFrame> {
        self.frames.iter_mut().find(|f| f.handle == handle)
    }

    pub fn frames(&self) -> &[ClientFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceLocation;

    #[derive(Debug)]
    struct Nothing;

    impl TemplateClient for Nothing {
        fn apply_definition(
            &self,
            _: &mut ViewEvaluationContext<'_>,
            _: &mut ComponentTree,
            _: NodeId,
            _: Option<&str>,
        ) -> ViewResult<bool> {
            Ok(false)
        }
    }

    fn owner() -> Arc<CompiledView> {
        let loc = SourceLocation::parse("mem:///a.xhtml").unwrap();
        Arc::new(CompiledView::empty(loc, "/a.xhtml", 0, -1))
    }

    #[test]
    fn test_push_front_extend_back() {
        let mut stack = ClientStack::default();
        let a = stack.push(owner(), Arc::new(Nothing));
        let b = stack.push(owner(), Arc::new(Nothing));
        let c = stack.extend(owner(), Arc::new(Nothing));

        let order: Vec<_> = stack.frames().iter().map(|f| f.handle).collect();
        assert_eq!(order, vec![b, a, c]);
    }

    #[test]
    fn test_pop_unknown_handle_fails() {
        let mut stack = ClientStack::default();
        let a = stack.push(owner(), Arc::new(Nothing));
        stack.pop(a).unwrap();
        assert_eq!(stack.len(), 0);

        let err = stack.pop(a).unwrap_err();
        assert!(matches!(err, ViewError::TemplateClientNotFound { .. }));
    }
}
