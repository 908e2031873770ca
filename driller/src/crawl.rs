//! Crawl orchestrator: fan commits out to a bounded worker pool, fan the
//! surviving hits back in.
//!
//! Materializing a commit goes through one mutex shared by all workers.
//! Matching runs outside it.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::extraction::{CommitHits, Extractor, FileOriginCache};
use crate::git_mining::{CommitRecord, CommitSource, GitMiningError};

/// Completed commits between progress lines.
pub const LOG_INTERVAL: usize = 200;

/// How long to wait for the commit view lock, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            attempts: 3,
        }
    }
}

/// A commit that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    pub hash: String,
    pub reason: String,
}

/// Fan-in result of one crawl.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    /// Commits loaded and scanned.
    pub processed: usize,
    /// Commits with at least one mention, in completion order.
    pub hits: Vec<CommitHits>,
    pub failures: Vec<CommitFailure>,
}

struct Worker {
    source: Arc<dyn CommitSource>,
    extractor: Arc<Extractor>,
    origins: Option<Arc<FileOriginCache>>,
    view_lock: Arc<Mutex<()>>,
    lock_policy: LockPolicy,
}

impl Worker {
    /// Load one commit while holding the view lock.
    fn load_exclusive(&self, hash: &str) -> Result<CommitRecord, GitMiningError> {
        let attempts = self.lock_policy.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(_guard) = self.view_lock.try_lock_for(self.lock_policy.timeout) {
                return self.source.load(hash);
            }
            warn!(
                "Commit view lock busy for {} (attempt {}/{})",
                hash, attempt, attempts
            );
        }
        Err(GitMiningError::LockTimeout(hash.to_string()))
    }

    fn process(&self, hash: &str) -> Result<Option<CommitHits>, GitMiningError> {
        debug!("processing commit: {}", hash);
        let record = self.load_exclusive(hash)?;

        let mentions = self.extractor.extract(&record);
        if mentions.is_empty() {
            return Ok(None);
        }

        let mut hits = CommitHits::new(&record, mentions);
        drop(record);
        if let Some(cache) = &self.origins {
            hits.resolve_origins(cache, self.source.as_ref());
        }
        Ok(Some(hits))
    }

    fn run(&self, hash: String) -> Result<Option<CommitHits>, CommitFailure> {
        match catch_unwind(AssertUnwindSafe(|| self.process(&hash))) {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(CommitFailure {
                hash,
                reason: e.to_string(),
            }),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "worker panicked".to_string());
                Err(CommitFailure { hash, reason })
            }
        }
    }
}

/// Runs extraction over a list of commits with a fixed number of workers.
pub struct Crawler {
    source: Arc<dyn CommitSource>,
    extractor: Arc<Extractor>,
    origins: Option<Arc<FileOriginCache>>,
    view_lock: Arc<Mutex<()>>,
    lock_policy: LockPolicy,
    workers: usize,
}

impl Crawler {
    /// `workers == 0` means one per available CPU.
    pub fn new(source: Arc<dyn CommitSource>, extractor: Arc<Extractor>, workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        Self {
            source,
            extractor,
            origins: None,
            view_lock: Arc::new(Mutex::new(())),
            lock_policy: LockPolicy::default(),
            workers,
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Record first-seen dates of mentioned paths through `cache`.
    pub fn with_origin_cache(mut self, cache: Arc<FileOriginCache>) -> Self {
        self.origins = Some(cache);
        self
    }

    /// Share an existing view lock instead of a private one.
    pub fn with_view_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.view_lock = lock;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process `commits`. Failures are collected, never raised; results
    /// arrive in completion order.
    pub async fn crawl(&self, commits: Vec<String>) -> CrawlOutcome {
        let total = commits.len();
        info!("Processing {} commits with {} workers", total, self.workers);

        let worker = Arc::new(Worker {
            source: Arc::clone(&self.source),
            extractor: Arc::clone(&self.extractor),
            origins: self.origins.clone(),
            view_lock: Arc::clone(&self.view_lock),
            lock_policy: self.lock_policy,
        });

        let mut outcome = CrawlOutcome::default();
        let mut tasks = JoinSet::new();
        let mut completed = 0usize;

        for hash in commits {
            while tasks.len() >= self.workers {
                if let Some(joined) = tasks.join_next().await {
                    completed += 1;
                    Self::collect(&mut outcome, joined, completed, total);
                }
            }
            let worker = Arc::clone(&worker);
            tasks.spawn_blocking(move || worker.run(hash));
        }

        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            Self::collect(&mut outcome, joined, completed, total);
        }

        info!(
            "Processed {} commits: {} with ids, {} failed",
            outcome.processed,
            outcome.hits.len(),
            outcome.failures.len()
        );
        outcome
    }

    fn collect(
        outcome: &mut CrawlOutcome,
        joined: Result<Result<Option<CommitHits>, CommitFailure>, tokio::task::JoinError>,
        completed: usize,
        total: usize,
    ) {
        match joined {
            Ok(Ok(hits)) => {
                outcome.processed += 1;
                outcome.hits.extend(hits);
            }
            Ok(Err(failure)) => {
                warn!("Skipping commit {}: {}", failure.hash, failure.reason);
                outcome.failures.push(failure);
            }
            Err(e) => {
                warn!("Worker task lost: {}", e);
                outcome.failures.push(CommitFailure {
                    hash: String::new(),
                    reason: e.to_string(),
                });
            }
        }

        if completed % LOG_INTERVAL == 0 {
            info!("Completed {}/{} commits", completed, total);
        }
    }
}
