//! Error types for memory and cache operations
//!
//! A cache miss is never an error: lookups return `Ok(None)`. The variants below
//! cover the failures that callers may need to react to, chiefly a failed or
//! timed-out semantic search, which is always propagated.

use thiserror::Error;

/// Main error type for the memory layer
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Filesystem error from the durable store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// SQLite error from the persistent tier
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Semantic search backend failed
    #[error("Search error: {0}")]
    SearchError(String),

    /// Semantic search did not answer in time
    #[error("Search timed out after {timeout_ms}ms: {query}")]
    SearchTimeout { timeout_ms: u64, query: String },

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A required collaborator was not supplied at construction time
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::SerializationError(e.to_string())
    }
}

impl From<String> for MemoryError {
    fn from(s: String) -> Self {
        MemoryError::Other(s)
    }
}

impl From<&str> for MemoryError {
    fn from(s: &str) -> Self {
        MemoryError::Other(s.to_string())
    }
}

impl MemoryError {
    /// Whether the error came from the semantic search path
    pub fn is_search_failure(&self) -> bool {
        matches!(
            self,
            MemoryError::SearchError(_) | MemoryError::SearchTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MemoryError::SearchError("backend unreachable".to_string());
        assert_eq!(error.to_string(), "Search error: backend unreachable");

        let timeout_error = MemoryError::SearchTimeout {
            timeout_ms: 5000,
            query: "recent releases".to_string(),
        };
        assert!(timeout_error.to_string().contains("timed out after 5000ms"));

        let missing = MemoryError::MissingCollaborator("semantic search backend");
        assert!(missing.to_string().contains("semantic search backend"));
    }

    #[test]
    fn test_error_conversion() {
        let error: MemoryError = "test error".into();
        assert!(matches!(error, MemoryError::Other(_)));

        let error: MemoryError = "test error".to_string().into();
        assert!(matches!(error, MemoryError::Other(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: MemoryError = json_err.into();
        assert!(matches!(error, MemoryError::SerializationError(_)));
    }

    #[test]
    fn test_search_failure_classification() {
        assert!(MemoryError::SearchError("x".into()).is_search_failure());
        assert!(MemoryError::SearchTimeout {
            timeout_ms: 1,
            query: "q".into()
        }
        .is_search_failure());
        assert!(!MemoryError::ConfigError("x".into()).is_search_failure());
    }
}
