//! Request lifecycle.
//!
//! Six phases run over each request:
//!
//! ```text
//! RestoreView → ApplyRequestValues → ProcessValidations
//!             → UpdateModelValues → InvokeApplication → RenderResponse
//! ```
//!
//! [`Lifecycle::execute`] runs the first five and [`Lifecycle::render`] the
//! last. Every phase goes through the same wrapper: before listeners, body,
//! after listeners in reverse, then the exception queue is drained.
//! `render_response()` on the request skips straight to rendering;
//! `response_complete()` stops everything.

mod error;
mod event;
mod exception;
mod listener;
mod phase;
mod process;
mod protected;
mod render;
mod request;
mod restore;
mod state;

pub use error::PipelineError;
pub use event::{SystemEvent, SystemEventListener};
pub use exception::{ExceptionHandler, ExceptionStage, LoggingHandler, QueuedException, RethrowingHandler};
pub use listener::{Listeners, PhaseListener, PhaseListeners};
pub use phase::PhaseId;
pub use process::{DefaultProcessor, TreeProcessor};
pub use protected::TOKEN_PARAM;
pub use request::{ERROR_PAGE_MARKER, Request, RequestContext};
pub use restore::logical_view_id;
pub use state::{MemoryStateManager, StateManager};

use std::sync::Arc;

use crate::view::ViewFactory;
use crate::debug;

/// Lifecycle settings.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// View ids that require the session token.
    pub protected_views: Vec<String>,
    /// Cap on pre-render navigations per render; unbounded when `None`.
    pub max_view_rebuilds: Option<usize>,
    /// Appended to request paths without an extension.
    pub suffix: String,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            protected_views: Vec::new(),
            max_view_rebuilds: None,
            suffix: ".xhtml".to_string(),
        }
    }
}

/// Drives requests through the phases.
///
/// Shared by every request; all per-request state lives in the
/// [`RequestContext`].
pub struct Lifecycle {
    factory: Arc<ViewFactory>,
    listeners: PhaseListeners,
    state: Arc<dyn StateManager>,
    processor: Arc<dyn TreeProcessor>,
    events: Vec<Arc<dyn SystemEventListener>>,
    exceptions: Arc<dyn ExceptionHandler>,
    options: LifecycleOptions,
}

impl Lifecycle {
    pub fn new(factory: Arc<ViewFactory>, options: LifecycleOptions) -> Self {
        Self {
            factory,
            listeners: PhaseListeners::default(),
            state: Arc::new(MemoryStateManager::new()),
            processor: Arc::new(DefaultProcessor),
            events: Vec::new(),
            exceptions: Arc::new(RethrowingHandler),
            options,
        }
    }

    pub fn with_state_manager(mut self, state: Arc<dyn StateManager>) -> Self {
        self.state = state;
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn TreeProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exceptions = handler;
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn SystemEventListener>) -> Self {
        self.events.push(listener);
        self
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Run RestoreView through InvokeApplication.
    ///
    /// Stops before any phase once the response is complete or rendering
    /// was requested.
    pub fn execute(&self, ctx: &mut RequestContext) -> Result<(), PipelineError> {
        for (phase, body) in phase::EXECUTE_PHASES {
            if ctx.is_render_response() || ctx.is_response_complete() {
                debug!("lifecycle"; "short-circuit before {}", phase);
                break;
            }
            phase::do_phase(self, phase, body, ctx)?;
        }
        Ok(())
    }

    /// Run RenderResponse unless the response is already complete.
    pub fn render(&self, ctx: &mut RequestContext) -> Result<(), PipelineError> {
        if ctx.is_response_complete() {
            return Ok(());
        }
        let (phase, body) = phase::RENDER_PHASE;
        phase::do_phase(self, phase, body, ctx)
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn add_phase_listener(&self, listener: Arc<dyn PhaseListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_phase_listener(&self, listener: &Arc<dyn PhaseListener>) {
        self.listeners.remove(listener);
    }

    pub fn phase_listeners(&self) -> Listeners {
        self.listeners.snapshot()
    }

    #[inline]
    pub(crate) fn listeners(&self) -> &PhaseListeners {
        &self.listeners
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    #[inline]
    pub fn factory(&self) -> &Arc<ViewFactory> {
        &self.factory
    }

    #[inline]
    pub fn state_manager(&self) -> &Arc<dyn StateManager> {
        &self.state
    }

    #[inline]
    pub fn options(&self) -> &LifecycleOptions {
        &self.options
    }

    #[inline]
    pub(crate) fn processor(&self) -> &Arc<dyn TreeProcessor> {
        &self.processor
    }

    #[inline]
    pub(crate) fn exception_handler(&self) -> &Arc<dyn ExceptionHandler> {
        &self.exceptions
    }

    /// Deliver `event` to every system event listener; the first failure
    /// stops delivery.
    pub(crate) fn publish(&self, event: &SystemEvent, ctx: &mut RequestContext) -> anyhow::Result<()> {
        for listener in &self.events {
            listener.process_event(event, ctx)?;
        }
        Ok(())
    }
}
