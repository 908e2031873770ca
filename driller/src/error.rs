//! Error types for the driller.

use thiserror::Error;
use vul_driller_store::StoreError;

use crate::git_mining::GitMiningError;
use crate::registry::RegistryError;

/// Errors that abort a driller run.
#[derive(Debug, Error)]
pub enum DrillError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Git error: {0}")]
    Git(#[from] GitMiningError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid exclude pattern: {0}")]
    Exclude(#[from] globset::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DrillError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias for driller operations.
pub type Result<T> = std::result::Result<T, DrillError>;
