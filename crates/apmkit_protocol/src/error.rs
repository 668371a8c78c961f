//! Error types for the beacon protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding collector responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The response body is empty.
    #[error("empty response body")]
    EmptyBody,

    /// The response carries an unexpected `type` marker.
    #[error("unexpected response type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Expected type marker.
        expected: &'static str,
        /// Actual type marker.
        actual: String,
    },

    /// A field could not be converted to its expected type.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Wire key of the field.
        key: String,
        /// Raw value received.
        value: String,
    },

    /// A required field is missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The structured (JSON) body could not be decoded.
    #[error("malformed JSON response: {0}")]
    Json(String),
}

impl ProtocolError {
    pub(crate) fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
