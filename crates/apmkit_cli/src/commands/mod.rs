//! CLI command implementations.

pub mod parse_status;
pub mod simulate;
pub mod version;

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by the commands themselves.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// A referenced file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Neither a body nor a file was given.
    #[error("either --body or --file is required")]
    MissingBody,

    /// The response body could not be decoded.
    #[error("invalid status body: {0}")]
    InvalidBody(#[from] apmkit_protocol::ProtocolError),

    /// The sender did not finish initialization in time.
    #[error("agent did not initialize within {0:?}")]
    InitTimeout(Duration),
}
