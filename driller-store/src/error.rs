//! Error types for vul-driller-store

use thiserror::Error;

/// Errors that can occur while reading or writing persisted state
#[derive(Debug, Error)]
pub enum StoreError {
    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Unreadable entry while listing prior dataset files
    #[error("Glob error: {0}")]
    Glob(#[from] glob::GlobError),

    /// Bad glob pattern built from the dataset basename
    #[error("Pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    /// A temporary file could not be moved into place
    #[error("Persist error: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// Invalid path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Checkpoint marker exists but is unusable
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an invalid checkpoint error
    pub fn invalid_checkpoint(msg: impl Into<String>) -> Self {
        Self::InvalidCheckpoint(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
