//! Error taxonomy for the retrieval engine.

use thiserror::Error;

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the vector store and its callers.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Document not found.
    #[error("document not found: {id}")]
    NotFound { id: String },

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound { name: String },

    /// Embedding length does not match the collection's dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Collection exists with a different configuration.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Bad input, rejected before touching storage.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Transient backend failure. Callers may retry with backoff; the core
    /// itself never retries.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// Operation cancelled by the caller. Not an error for alerting purposes.
    #[error("operation cancelled")]
    Cancelled,

    /// Fatal startup failure (storage unreachable, incompatible schema).
    #[error("initialization error: {message}")]
    Initialization { message: String },

    /// Stored state failed an integrity check.
    #[error("corrupt state: {message}")]
    CorruptState { message: String },

    /// Unrecognized store type in the configuration.
    #[error("unsupported backend: {kind}")]
    UnsupportedBackend { kind: String },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptState {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether a caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Whether this is a read miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::CollectionNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::not_found("doc-42");
        assert!(err.to_string().contains("doc-42"));

        let err = StoreError::DimensionMismatch {
            expected: 1536,
            actual: 768,
        };
        assert!(err.to_string().contains("1536"));
        assert!(err.to_string().contains("768"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::unavailable("db locked").is_retryable());
        assert!(!StoreError::Cancelled.is_retryable());
        assert!(!StoreError::validation("bad").is_retryable());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(StoreError::not_found("x").is_not_found());
        assert!(StoreError::collection_not_found("c").is_not_found());
        assert!(!StoreError::Cancelled.is_not_found());
    }
}
