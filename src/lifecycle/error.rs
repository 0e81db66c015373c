//! Errors raised by the request lifecycle.

use thiserror::Error;

use super::exception::ExceptionStage;
use super::phase::PhaseId;
use crate::view::ViewError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A postback whose saved view is gone.
    #[error("view {view_id} could not be restored")]
    ViewExpired { view_id: String },

    #[error("protected view rejected: {reason}")]
    ProtectedView { reason: String },

    #[error("no view id could be derived from the request")]
    MissingViewId,

    #[error(transparent)]
    View(#[from] ViewError),

    /// Failure of an external traversal or event hook.
    #[error("{phase} failed")]
    Phase {
        phase: PhaseId,
        #[source]
        source: anyhow::Error,
    },

    #[error("phase listener failed {stage} {phase}")]
    Listener {
        phase: PhaseId,
        stage: ExceptionStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("view {view_id} was rebuilt more than {limit} times")]
    RebuildLimit { view_id: String, limit: usize },
}

impl PipelineError {
    pub(crate) fn protected(reason: impl Into<String>) -> Self {
        Self::ProtectedView {
            reason: reason.into(),
        }
    }

    /// Errors that end the request instead of rendering an error view.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ViewExpired { .. } | Self::ProtectedView { .. })
    }
}
