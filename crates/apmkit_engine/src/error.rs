//! Error types for the engine.

use apmkit_core::CoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while setting up or talking to the collector.
///
/// None of them reach the application once the agent runs: transport
/// errors are turned into erroneous responses by [`crate::HttpTransport`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Timeout.
    #[error("request timed out")]
    Timeout,

    /// Invalid agent configuration.
    #[error("configuration error: {0}")]
    Core(#[from] CoreError),

    /// Invalid sender configuration.
    #[error("invalid sender configuration: {0}")]
    InvalidConfig(String),

    /// The background sender thread could not be started.
    #[error("failed to spawn beacon sender: {0}")]
    Spawn(#[source] std::io::Error),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { retryable, .. } => *retryable,
            EngineError::Timeout => true,
            _ => false,
        }
    }
}
