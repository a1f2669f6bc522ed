//! Storage error types.

use thiserror::Error;

/// Failures from a persistence backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not reach the backend.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A stored document could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Anything else.
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
