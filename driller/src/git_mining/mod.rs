//! Git-backed history access.
//!
//! This module provides:
//! - a thin wrapper over the `git` CLI
//! - parsing of single-commit views (header plus zero-context patch)
//! - the Commit Source contract and its git implementation
//! - a checkpoint store that keeps the marker as a repository tag

mod checkpoint;
mod error;
mod executor;
mod parser;
mod source;

pub use checkpoint::GitTagCheckpointStore;
pub use error::GitMiningError;
pub use executor::{git_available, GitExecutor};
pub use parser::{parse_commit, parse_patch, CommitRecord, FileModification, Identity, SHOW_FORMAT};
pub use source::{CommitRange, CommitSource, FileOrigin, GitCommitSource};

#[cfg(test)]
pub(crate) use executor::tests::TestRepo;
