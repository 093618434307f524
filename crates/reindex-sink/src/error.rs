//! Error types for search sinks.

use thiserror::Error;

/// Errors raised by a search sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Request never got a response (connection refused, timeout, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Cluster answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Index or alias missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Index already exists
    #[error("Index already exists: {0}")]
    IndexExists(String),

    /// Response body could not be read
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Client could not be built
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SinkError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Transport failures, 429 and 5xx responses are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Transport(_) => true,
            SinkError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SinkError::Serialization(err.to_string())
        } else {
            SinkError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}
