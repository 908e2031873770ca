//! Commit Source: the history store seen as a list of commits that can be
//! materialized one at a time.

use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

use super::executor::GitExecutor;
use super::parser::{self, CommitRecord, FIELD_SEPARATOR, SHOW_FORMAT};
use super::GitMiningError;

/// Commits to visit in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitRange {
    /// HEAD as resolved when the range was computed. `None` for empty history.
    pub head: Option<String>,
    /// Commit hashes, oldest first.
    pub commits: Vec<String>,
}

/// First author and committer dates of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOrigin {
    pub author_date: DateTime<Utc>,
    pub committer_date: DateTime<Utc>,
}

/// Read access to commit history.
pub trait CommitSource: Send + Sync {
    /// Commits after `since` up to HEAD; full history when `since` is `None`.
    fn list_commits(&self, since: Option<&str>) -> Result<CommitRange, GitMiningError>;

    /// Materialize one commit.
    fn load(&self, hash: &str) -> Result<CommitRecord, GitMiningError>;

    /// First dates of `path`, `None` when it has no history.
    fn file_origin(&self, _path: &str) -> Result<Option<FileOrigin>, GitMiningError> {
        Ok(None)
    }
}

/// Commit Source backed by the `git` CLI.
pub struct GitCommitSource {
    executor: GitExecutor,
}

impl GitCommitSource {
    pub fn new(executor: GitExecutor) -> Self {
        Self { executor }
    }

    pub fn open(repo_path: &Path) -> Result<Self, GitMiningError> {
        Ok(Self::new(GitExecutor::new(repo_path)?))
    }

    pub fn executor(&self) -> &GitExecutor {
        &self.executor
    }
}

impl CommitSource for GitCommitSource {
    fn list_commits(&self, since: Option<&str>) -> Result<CommitRange, GitMiningError> {
        let Some(head) = self.executor.head()? else {
            return Ok(CommitRange::default());
        };

        let since = match since {
            Some(rev) => match self.executor.verify_revision(rev)? {
                Some(hash) => Some(hash),
                None => {
                    warn!("Checkpoint {} is not in history, processing all commits", rev);
                    None
                }
            },
            None => None,
        };

        let commits = self.executor.rev_list(since.as_deref(), &head)?;
        debug!(
            "Listed {} commits in {}..{}",
            commits.len(),
            since.as_deref().unwrap_or("<root>"),
            head
        );
        Ok(CommitRange {
            head: Some(head),
            commits,
        })
    }

    fn load(&self, hash: &str) -> Result<CommitRecord, GitMiningError> {
        let output = self.executor.show_commit(hash, SHOW_FORMAT)?;
        parser::parse_commit(&output)
    }

    fn file_origin(&self, path: &str) -> Result<Option<FileOrigin>, GitMiningError> {
        if path == "/dev/null" {
            return Ok(None);
        }
        let Some(line) = self.executor.file_origin_dates(path)? else {
            return Ok(None);
        };
        let Some((author, committer)) = line.split_once(FIELD_SEPARATOR) else {
            return Err(GitMiningError::parse(format!("origin dates {line:?}")));
        };
        Ok(Some(FileOrigin {
            author_date: parser::parse_date(author)?,
            committer_date: parser::parse_date(committer)?,
        }))
    }
}
