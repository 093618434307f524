//! Error types shared across the reindex workspace.

use thiserror::Error;

/// Unified error type for configuration and domain-type validation.
#[derive(Debug, Error)]
pub enum ReindexError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReindexError::Config("chunk_size must be > 0".to_string());
        assert_eq!(err.to_string(), "Configuration error: chunk_size must be > 0");

        let err = ReindexError::InvalidInput("bad batch".to_string());
        assert_eq!(err.to_string(), "Invalid input: bad batch");
    }
}
