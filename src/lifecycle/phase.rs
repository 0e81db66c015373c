//! Phase identifiers and the shared per-phase wrapper.

use std::fmt;

use super::Lifecycle;
use super::error::PipelineError;
use super::exception::{ExceptionStage, QueuedException};
use super::request::RequestContext;
use super::{process, render, restore};
use crate::debug;

/// The six lifecycle phases, plus the wildcard listeners register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseId {
    Any,
    RestoreView,
    ApplyRequestValues,
    ProcessValidations,
    UpdateModelValues,
    InvokeApplication,
    RenderResponse,
}

impl PhaseId {
    /// Every real phase, in execution order.
    pub const ALL: [PhaseId; 6] = [
        Self::RestoreView,
        Self::ApplyRequestValues,
        Self::ProcessValidations,
        Self::UpdateModelValues,
        Self::InvokeApplication,
        Self::RenderResponse,
    ];

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::RestoreView => "RESTORE_VIEW",
            Self::ApplyRequestValues => "APPLY_REQUEST_VALUES",
            Self::ProcessValidations => "PROCESS_VALIDATIONS",
            Self::UpdateModelValues => "UPDATE_MODEL_VALUES",
            Self::InvokeApplication => "INVOKE_APPLICATION",
            Self::RenderResponse => "RENDER_RESPONSE",
        }
    }

    /// Whether a listener registered for `self` observes `phase`.
    #[inline]
    pub fn matches(self, phase: PhaseId) -> bool {
        self == Self::Any || self == phase
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Phase table
// ============================================================================

pub(super) type PhaseBody = fn(&Lifecycle, &mut RequestContext) -> Result<(), PipelineError>;

/// Phases run by `execute`, in order.
pub(super) const EXECUTE_PHASES: [(PhaseId, PhaseBody); 5] = [
    (PhaseId::RestoreView, restore::restore_view),
    (PhaseId::ApplyRequestValues, process::apply_request_values),
    (PhaseId::ProcessValidations, process::process_validations),
    (PhaseId::UpdateModelValues, process::update_model_values),
    (PhaseId::InvokeApplication, process::invoke_application),
];

/// The phase run by `render`.
pub(super) const RENDER_PHASE: (PhaseId, PhaseBody) = (PhaseId::RenderResponse, render::render_response);

/// Body is skipped once the response is complete, or for every phase but
/// RenderResponse once rendering was requested.
fn should_skip(phase: PhaseId, ctx: &RequestContext) -> bool {
    ctx.is_response_complete() || (ctx.is_render_response() && phase != PhaseId::RenderResponse)
}

/// Run one phase: before listeners, body, after listeners in reverse, then
/// drain the exception queue.
///
/// A before listener that fails stops the before pass; only the listeners
/// before it get their after callback.
pub(super) fn do_phase(
    lifecycle: &Lifecycle,
    phase: PhaseId,
    body: PhaseBody,
    ctx: &mut RequestContext,
) -> Result<(), PipelineError> {
    ctx.set_current_phase(phase);
    let listeners = lifecycle.listeners().snapshot();
    debug!("lifecycle"; "entering {} ({} listeners)", phase, listeners.len());

    let mut reached = listeners.len();
    for (i, listener) in listeners.iter().enumerate() {
        if !listener.phase_id().matches(phase) {
            continue;
        }
        if let Err(source) = listener.before_phase(phase, ctx) {
            let error = PipelineError::Listener {
                phase,
                stage: ExceptionStage::Before,
                source,
            };
            ctx.queue_exception(QueuedException::new(error, phase, ExceptionStage::Before));
            reached = i;
            break;
        }
    }

    if should_skip(phase, ctx) {
        debug!("lifecycle"; "skipped body of {}", phase);
    } else if let Err(error) = body(lifecycle, ctx) {
        ctx.queue_exception(QueuedException::new(error, phase, ExceptionStage::Body));
    }

    for listener in listeners[..reached].iter().rev() {
        if !listener.phase_id().matches(phase) {
            continue;
        }
        if let Err(source) = listener.after_phase(phase, ctx) {
            let error = PipelineError::Listener {
                phase,
                stage: ExceptionStage::After,
                source,
            };
            ctx.queue_exception(QueuedException::new(error, phase, ExceptionStage::After));
            break;
        }
    }

    let queued = ctx.take_exceptions();
    if queued.is_empty() {
        Ok(())
    } else {
        lifecycle.exception_handler().handle(queued)
    }
}
