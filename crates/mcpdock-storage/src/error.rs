//! Errors raised while persisting server records and OAuth credentials.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failure reading or writing a stored value.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The data directory or a value file could not be read or written.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value did not match the expected shape, or could not be encoded.
    #[error("Stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A key was empty or had a segment that would escape the data directory.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("In-memory storage lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }
}
