//! Error types for FieldSync

use thiserror::Error;

/// Result type alias for FieldSync operations
pub type Result<T> = std::result::Result<T, FieldSyncError>;

/// Main error type for FieldSync
#[derive(Error, Debug)]
pub enum FieldSyncError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FieldSyncError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, FieldSyncError::Transport(_) | FieldSyncError::Sync(_))
    }
}
