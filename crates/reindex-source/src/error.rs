//! Error types for relational sources.

use thiserror::Error;

/// Errors raised while reading from a source
#[derive(Error, Debug)]
pub enum SourceError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row could not be turned into a document
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Rows came back unordered, duplicated or not past the lower bound
    #[error("Out of order rows: {0}")]
    OutOfOrder(String),

    /// Table or column name that can't be safely interpolated
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// No handler registered for a category key
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// Source not reachable (used by sources without a database driver)
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Serialization(err.to_string())
    }
}
