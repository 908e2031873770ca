//! Driller configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crawl::LockPolicy;
use crate::error::{DrillError, Result};
use crate::merge::KeyScope;
use crate::registry::FamilyTag;

/// Where the checkpoint marker lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    /// Tag in the mined repository.
    #[default]
    Tag,
    /// Marker file in the output directory.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub kind: CheckpointKind,
    /// Tag name, or marker file name.
    pub name: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            kind: CheckpointKind::Tag,
            name: "last_run".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Max wait per attempt for the commit view lock.
    pub timeout_ms: u64,
    /// Attempts before a commit is skipped.
    pub retries: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            retries: 3,
        }
    }
}

/// Top-level driller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrillConfig {
    pub work_path: String,
    pub repo_path: String,
    pub clone_url: Option<String>,
    pub data_source: Option<String>,
    pub output_path: String,
    pub outfile_basename: String,
    pub log_file: Option<String>,
    /// 0 means one worker per CPU.
    pub workers: usize,
    /// Enabled identifier families; empty means all.
    pub families: Vec<String>,
    pub key_scope: KeyScope,
    /// Globs of file paths that are not scanned.
    pub exclude_paths: Vec<String>,
    pub track_file_origins: bool,
    pub tag_references: bool,
    pub refresh_after_secs: u64,
    pub checkpoint: CheckpointConfig,
    pub lock: LockConfig,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            work_path: ".".to_string(),
            repo_path: "repo".to_string(),
            clone_url: None,
            data_source: None,
            output_path: "output".to_string(),
            outfile_basename: "vul_sightings".to_string(),
            log_file: None,
            workers: 0,
            families: Vec::new(),
            key_scope: KeyScope::File,
            exclude_paths: Vec::new(),
            track_file_origins: false,
            tag_references: false,
            refresh_after_secs: 3600 * 4,
            checkpoint: CheckpointConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl DrillConfig {
    /// Load configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings no run could use.
    pub fn validate(&self) -> Result<()> {
        if self.outfile_basename.trim().is_empty() {
            return Err(DrillError::config("outfile_basename must not be empty"));
        }
        if self.checkpoint.name.trim().is_empty() {
            return Err(DrillError::config("checkpoint.name must not be empty"));
        }
        self.family_tags()?;
        Ok(())
    }

    /// Enabled families, all of them when the list is empty.
    pub fn family_tags(&self) -> Result<Vec<FamilyTag>> {
        if self.families.is_empty() {
            return Ok(FamilyTag::ALL.to_vec());
        }
        self.families
            .iter()
            .map(|f| f.parse::<FamilyTag>().map_err(DrillError::from))
            .collect()
    }

    /// Repository location; relative paths hang off `work_path`.
    pub fn repo_dir(&self) -> PathBuf {
        let repo = expand_home(&self.repo_path);
        if repo.is_absolute() {
            repo
        } else {
            expand_home(&self.work_path).join(repo)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.output_path)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file.as_deref().map(expand_home)
    }

    /// Value of the `data_source` column: explicit setting, else the clone
    /// URL, else the repository directory name.
    pub fn data_source(&self) -> String {
        if let Some(source) = self.data_source.as_ref().or(self.clone_url.as_ref()) {
            return source.clone();
        }
        self.repo_dir()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.repo_path.clone())
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_millis(self.lock.timeout_ms),
            attempts: self.lock.retries.max(1),
        }
    }

    pub fn refresh_after(&self) -> Duration {
        Duration::from_secs(self.refresh_after_secs)
    }
}
