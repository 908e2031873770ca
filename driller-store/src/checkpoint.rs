//! Checkpoint markers
//!
//! A checkpoint names the last commit whose sightings are known to be in the
//! persisted dataset. Runs resume from it and advance it only after the
//! dataset write succeeded.

use parking_lot::RwLock;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::dataset::parent_dir;
use crate::error::{Result, StoreError};

/// Storage for the processed-up-to marker
pub trait CheckpointStore: Send + Sync {
    /// The recorded commit, or `None` on a first run
    fn read(&self) -> Result<Option<String>>;

    /// Record `commit` as processed
    fn write(&self, commit: &str) -> Result<()>;
}

fn validate_marker(raw: &str) -> Result<Option<String>> {
    let marker = raw.trim();
    if marker.is_empty() {
        return Ok(None);
    }
    if marker.split_whitespace().count() != 1 {
        return Err(StoreError::invalid_checkpoint(format!(
            "expected a single revision, got {marker:?}"
        )));
    }
    Ok(Some(marker.to_string()))
}

/// Checkpoint kept in a small text file
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => validate_marker(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, commit: &str) -> Result<()> {
        let commit = validate_marker(commit)?
            .ok_or_else(|| StoreError::invalid_checkpoint("empty revision"))?;
        let dir = parent_dir(&self.path)?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        writeln!(tmp, "{commit}")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        log::debug!("Checkpoint {} -> {}", self.path.display(), commit);
        Ok(())
    }
}

/// In-process checkpoint, for tests and dry runs
#[derive(Default)]
pub struct MemoryCheckpointStore {
    marker: RwLock<Option<String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(commit: impl Into<String>) -> Self {
        Self {
            marker: RwLock::new(Some(commit.into())),
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.marker.read().clone())
    }

    fn write(&self, commit: &str) -> Result<()> {
        *self.marker.write() = Some(commit.to_string());
        Ok(())
    }
}
