//! Relationship store error types

use thiserror::Error;

/// Errors raised by a [`RelationshipStore`](super::RelationshipStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, DNS or TLS failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success status
    #[error("Store returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Annotation not found
    #[error("Annotation not found: {0}")]
    NotFound(String),

    /// The annotation changed since it was read (If-Match rejected)
    #[error("Annotation was modified concurrently: {0}")]
    PreconditionFailed(String),

    /// Writes need a bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request exceeded the configured timeout
    #[error("Store request timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            StoreError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}
