//! Error types for Engram

use thiserror::Error;

/// Main error type for Engram operations
#[derive(Error, Debug)]
pub enum EngramError {
    /// Bad input: dimension mismatch, empty tenant/workspace, length
    /// mismatches. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage-related errors (LanceDB, file system, etc.). Retryable
    /// with backoff by the caller.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An operation exceeded its deadline. Committed batches stay
    /// committed; uncommitted chunks are not applied.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse failure category surfaced to upstream pipeline callers.
///
/// Ingestion callers expect a StepResult-shaped outcome: success with an id,
/// or a failure tagged with one of these categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Storage,
    Timeout,
    Internal,
}

impl EngramError {
    /// Map this error onto the category contract exposed to callers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngramError::Validation(_) => ErrorCategory::Validation,
            EngramError::Storage(_) | EngramError::Io(_) => ErrorCategory::Storage,
            EngramError::Timeout(_) => ErrorCategory::Timeout,
            EngramError::Config(_)
            | EngramError::Embedding(_)
            | EngramError::Serialization(_) => ErrorCategory::Internal,
        }
    }

    /// Whether a caller may retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Storage | ErrorCategory::Timeout
        )
    }
}

/// Result type alias for Engram operations
pub type Result<T> = std::result::Result<T, EngramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_retryable() {
        let err = EngramError::Validation("empty tenant".to_string());
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_and_timeout_are_retryable() {
        assert!(EngramError::Storage("backend down".to_string()).is_retryable());
        assert!(EngramError::Timeout("upsert".to_string()).is_retryable());
    }

    #[test]
    fn test_io_maps_to_storage_category() {
        let err: EngramError = std::io::Error::other("disk").into();
        assert_eq!(err.category(), ErrorCategory::Storage);
    }
}
