//! Error types for pipeline listeners.

use thiserror::Error;

/// Errors a listener can report from one of its lifecycle calls.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Listener failed: {0}")]
    Failed(String),

    #[error("Listener panicked: {0}")]
    Panicked(String),
}

impl ListenerError {
    /// Creates a generic failure from any displayable reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
