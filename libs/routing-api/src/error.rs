//! Error types for registry model handling.

use thiserror::Error;

/// Errors that can occur when decoding registry payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The event action is not one of the recognised values.
    #[error("unknown-event-action:{0}")]
    UnknownEventAction(String),

    /// The event payload is invalid.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("invalid port range: {0}")]
    InvalidPortRange(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::InvalidPayload(err.to_string())
    }
}
