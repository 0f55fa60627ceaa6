//! Store error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("key is locked: {key} (lease expires in {remaining_ms}ms)")]
    Locked { key: String, remaining_ms: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the error means the key is held by another lease.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// Whether the error means the key has no record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<larder_core::Error> for StoreError {
    fn from(err: larder_core::Error) -> Self {
        match err {
            larder_core::Error::InvalidKey(msg) => Self::InvalidKey(msg),
            larder_core::Error::Config(msg) => Self::Config(msg),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
