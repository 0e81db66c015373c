//! Errors raised while resolving, compiling or applying views.

use std::io;

use thiserror::Error;

/// Failure of a view operation.
///
/// Compile and lookup failures are local: the call that triggered them
/// fails and no cache entry is left behind.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("view source not found: {path}")]
    SourceNotFound { path: String },

    #[error("{alias}:{line}: {message}")]
    Compile {
        alias: String,
        line: usize,
        message: String,
    },

    /// A contract resource requested through the plain view entry point.
    #[error("illegal path, direct contract reference: {path}")]
    ContractResource { path: String },

    #[error("template client {handle} is not on the client stack")]
    TemplateClientNotFound { handle: u64 },

    #[error("cannot evaluate `{expression}`: {message}")]
    Evaluation { expression: String, message: String },

    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ViewError {
    pub(crate) fn compile(alias: &str, line: usize, message: impl Into<String>) -> Self {
        Self::Compile {
            alias: alias.to_string(),
            line,
            message: message.into(),
        }
    }

    /// Whether the error means the source does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SourceNotFound { .. } => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type ViewResult<T> = Result<T, ViewError>;
