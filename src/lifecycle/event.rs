//! System events published by the lifecycle.

use super::request::RequestContext;
use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// Delivered once per node of a restored or freshly created view.
    PostRestoreState { node: NodeId },
    /// Before rendering; a listener may navigate by changing the view id.
    PreRenderView,
    PostRenderView,
}

pub trait SystemEventListener: Send + Sync {
    fn process_event(&self, event: &SystemEvent, ctx: &mut RequestContext) -> anyhow::Result<()>;
}
