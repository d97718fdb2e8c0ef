//! Error types for tipsync

use thiserror::Error;

/// Result type alias for tipsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for tipsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Remote store unreachable")]
    Unreachable,

    #[error("Principal unavailable: {0}")]
    Principal(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Check if error is worth retrying on a later pass.
    ///
    /// Informational only: the coordinator treats every remote failure the
    /// same way for retry accounting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(_) | SyncError::Unreachable | SyncError::Io(_)
        )
    }
}
