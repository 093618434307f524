//! Error types for the indexing pipeline.

use reindex_sink::SinkError;
use reindex_source::SourceError;
use thiserror::Error;

/// Errors that can occur in the indexing pipeline
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Reading from the source failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Sink request failed in a way retrying won't fix
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Local checkpoint database error
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The sink and checkpoint history don't identify a single index
    #[error("Ambiguous index state: {0}")]
    AmbiguousIndex(String),

    /// The run was stopped before completing
    #[error("Run cancelled")]
    Cancelled,

    /// A pipeline task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IndexingError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexingError::Task(err.to_string())
    }
}
