//! Git command execution wrapper.

use super::GitMiningError;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Wrapper for executing git commands against one repository.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    repo_path: PathBuf,
}

fn git() -> Command {
    let mut cmd = Command::new("git");
    // never block on a credential prompt
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

fn check(output: Output) -> Result<Vec<u8>, GitMiningError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitMiningError::CommandFailed(stderr.trim().to_string()));
    }
    Ok(output.stdout)
}

/// Check that a `git` binary can be run.
pub fn git_available() -> bool {
    git()
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

impl GitExecutor {
    /// Create a new git executor for the given repository path.
    pub fn new(repo_path: &Path) -> Result<Self, GitMiningError> {
        if !git_available() {
            return Err(GitMiningError::GitNotAvailable);
        }

        // Verify path is a git repository
        let output = git()
            .current_dir(repo_path)
            .args(["rev-parse", "--git-dir"])
            .output();

        match output {
            Ok(o) if o.status.success() => Ok(Self {
                repo_path: repo_path.to_path_buf(),
            }),
            _ => Err(GitMiningError::NotARepository(repo_path.to_path_buf())),
        }
    }

    /// Clone `url` into `dest` and open the result.
    pub fn clone_repo(url: &str, dest: &Path) -> Result<Self, GitMiningError> {
        if !git_available() {
            return Err(GitMiningError::GitNotAvailable);
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        check(git().arg("clone").arg(url).arg(dest).output()?)?;
        Self::new(dest)
    }

    fn run<I, S>(&self, args: I) -> Result<String, GitMiningError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = git().current_dir(&self.repo_path).args(args).output()?;
        Ok(String::from_utf8(check(output)?)?)
    }

    /// Resolve HEAD to a commit hash. `None` for a repository without commits.
    pub fn head(&self) -> Result<Option<String>, GitMiningError> {
        self.verify_revision("HEAD")
    }

    /// Resolve `rev` to a commit hash, or `None` if it names no commit.
    pub fn verify_revision(&self, rev: &str) -> Result<Option<String>, GitMiningError> {
        let output = git()
            .current_dir(&self.repo_path)
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{rev}^{{commit}}"))
            .output()?;

        if !output.status.success() {
            return Ok(None);
        }
        let hash = String::from_utf8(output.stdout)?.trim().to_string();
        Ok((!hash.is_empty()).then_some(hash))
    }

    /// Commits reachable from `head` but not from `since`, oldest first.
    pub fn rev_list(&self, since: Option<&str>, head: &str) -> Result<Vec<String>, GitMiningError> {
        let range = match since {
            Some(since) => format!("{since}..{head}"),
            None => head.to_string(),
        };
        let stdout = self.run(["rev-list", "--reverse", "--topo-order", range.as_str()])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Header and zero-context patch of one commit.
    ///
    /// Merge commits come back without a patch. Root commits keep theirs and
    /// path prefixes are fixed regardless of user config. Diff content is
    /// decoded lossily since repositories carry arbitrary bytes.
    pub fn show_commit(&self, hash: &str, format: &str) -> Result<String, GitMiningError> {
        let output = git()
            .current_dir(&self.repo_path)
            .args([
                "-c",
                "core.quotepath=false",
                "-c",
                "log.showRoot=true",
                "-c",
                "diff.noprefix=false",
                "-c",
                "diff.mnemonicPrefix=false",
                "log",
                "-1",
                "-p",
                "-M",
                "--no-color",
                "--no-ext-diff",
                "--unified=0",
                "--src-prefix=a/",
                "--dst-prefix=b/",
            ])
            .arg(format!("--format={format}"))
            .arg(hash)
            .arg("--")
            .output()?;

        Ok(String::from_utf8_lossy(&check(output)?).into_owned())
    }

    /// First author and committer dates of `path` across all refs.
    pub fn file_origin_dates(&self, path: &str) -> Result<Option<String>, GitMiningError> {
        let stdout = self.run([
            "log",
            "--all",
            "--reverse",
            "--format=%aI%x1f%cI",
            "--",
            path,
        ])?;
        Ok(stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string()))
    }

    /// Point tag `name` at `commit`, moving it if it exists.
    pub fn force_tag(&self, name: &str, commit: &str) -> Result<(), GitMiningError> {
        self.run(["tag", "-f", name, commit])?;
        Ok(())
    }

    /// Create tag `name` at `commit`. Fails if it exists.
    pub fn create_tag(&self, name: &str, commit: &str) -> Result<(), GitMiningError> {
        self.run(["tag", name, commit])?;
        Ok(())
    }

    /// Fast-forward the current branch from its upstream.
    pub fn pull(&self) -> Result<(), GitMiningError> {
        self.run(["pull", "--ff-only", "--quiet"])?;
        Ok(())
    }

    /// Commit time of HEAD.
    pub fn head_commit_time(&self) -> Result<DateTime<Utc>, GitMiningError> {
        let stdout = self.run(["log", "-1", "--format=%cI", "HEAD"])?;
        let raw = stdout.trim();
        DateTime::parse_from_rfc3339(raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| GitMiningError::parse(format!("commit date {raw:?}: {e}")))
    }

    /// Get repository root path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}
