//! Request-scoped exception queue and its drain policies.
//!
//! Failures inside a phase are queued on the request instead of unwinding,
//! so after-phase listeners still run. The queue is drained once per phase
//! by the lifecycle's [`ExceptionHandler`].

use std::fmt;

use super::error::PipelineError;
use super::phase::PhaseId;
use crate::log;

/// Where in a phase an exception was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionStage {
    Before,
    Body,
    After,
}

impl fmt::Display for ExceptionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::Body => "in",
            Self::After => "after",
        })
    }
}

/// One queued failure.
#[derive(Debug)]
pub struct QueuedException {
    pub error: PipelineError,
    pub phase: PhaseId,
    pub stage: ExceptionStage,
}

impl QueuedException {
    pub fn new(error: PipelineError, phase: PhaseId, stage: ExceptionStage) -> Self {
        Self { error, phase, stage }
    }
}

/// Drains the queue at the end of every phase.
pub trait ExceptionHandler: Send + Sync {
    /// `queued` is never empty.
    fn handle(&self, queued: Vec<QueuedException>) -> Result<(), PipelineError>;
}

/// Logs every queued exception and returns the first one.
#[derive(Debug, Default, Clone, Copy)]
pub struct RethrowingHandler;

impl ExceptionHandler for RethrowingHandler {
    fn handle(&self, queued: Vec<QueuedException>) -> Result<(), PipelineError> {
        let mut first = None;
        for item in queued {
            report(&item);
            if first.is_none() {
                first = Some(item.error);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// Logs and swallows.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ExceptionHandler for LoggingHandler {
    fn handle(&self, queued: Vec<QueuedException>) -> Result<(), PipelineError> {
        queued.iter().for_each(report);
        Ok(())
    }
}

fn report(item: &QueuedException) {
    log!("exception"; "{} {}: {}", item.stage, item.phase, ErrorChain(&item.error));
}

/// Borrowed error rendered with its full source chain.
struct ErrorChain<'a>(&'a PipelineError);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = std::error::Error::source(self.0);
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(view_id: &str, stage: ExceptionStage) -> QueuedException {
        QueuedException::new(
            PipelineError::ViewExpired {
                view_id: view_id.to_string(),
            },
            PhaseId::RestoreView,
            stage,
        )
    }

    #[test]
    fn test_rethrowing_returns_first() {
        let err = RethrowingHandler
            .handle(vec![queued("/a.xhtml", ExceptionStage::Before), queued("/b.xhtml", ExceptionStage::Body)])
            .unwrap_err();
        assert!(matches!(err, PipelineError::ViewExpired { view_id } if view_id == "/a.xhtml"));
    }

    #[test]
    fn test_logging_swallows() {
        assert!(LoggingHandler.handle(vec![queued("/a.xhtml", ExceptionStage::After)]).is_ok());
    }

    #[test]
    fn test_chain_rendering() {
        let err = PipelineError::Phase {
            phase: PhaseId::InvokeApplication,
            source: anyhow::anyhow!("action failed"),
        };
        assert_eq!(ErrorChain(&err).to_string(), "INVOKE_APPLICATION failed: action failed");
    }
}
