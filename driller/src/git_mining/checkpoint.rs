//! Checkpoint kept as a tag in the mined repository.

use vul_driller_store::{CheckpointStore, StoreError};

use super::executor::GitExecutor;

/// Stores the checkpoint as a lightweight tag, moved forward on each run.
pub struct GitTagCheckpointStore {
    executor: GitExecutor,
    tag: String,
}

impl GitTagCheckpointStore {
    pub fn new(executor: GitExecutor, tag: impl Into<String>) -> Self {
        Self {
            executor,
            tag: tag.into(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl CheckpointStore for GitTagCheckpointStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        self.executor
            .verify_revision(&format!("refs/tags/{}", self.tag))
            .map_err(|e| StoreError::other(e.to_string()))
    }

    fn write(&self, commit: &str) -> Result<(), StoreError> {
        self.executor
            .force_tag(&self.tag, commit)
            .map_err(|e| StoreError::other(e.to_string()))
    }
}
