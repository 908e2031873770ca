//! One incremental run: read checkpoint, crawl the new commits, merge with
//! the persisted dataset, write it, then advance the checkpoint.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vul_driller_store::{CheckpointStore, Sighting, SightingStore};

use crate::crawl::{CommitFailure, Crawler, LockPolicy};
use crate::error::Result;
use crate::extraction::{Extractor, FileOriginCache};
use crate::git_mining::{CommitSource, GitExecutor, GitMiningError};
use crate::merge::{self, KeyScope};
use crate::registry::IdentifierRegistry;

/// Marks the earliest commit of a reference in the mined repository.
pub trait ReferenceTagger: Send + Sync {
    fn tag_reference(&self, reference: &str, commit: &str) -> std::result::Result<(), GitMiningError>;
}

impl ReferenceTagger for GitExecutor {
    fn tag_reference(&self, reference: &str, commit: &str) -> std::result::Result<(), GitMiningError> {
        self.force_tag(reference, commit)
    }
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct DrillOptions {
    pub data_source: String,
    pub workers: usize,
    pub key_scope: KeyScope,
    pub exclude_paths: Vec<String>,
    pub track_file_origins: bool,
    pub lock: LockPolicy,
}

impl Default for DrillOptions {
    fn default() -> Self {
        Self {
            data_source: String::new(),
            workers: 0,
            key_scope: KeyScope::File,
            exclude_paths: Vec::new(),
            track_file_origins: false,
            lock: LockPolicy::default(),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub previous_checkpoint: Option<String>,
    pub new_checkpoint: Option<String>,
    pub commits_listed: usize,
    pub commits_processed: usize,
    pub commits_with_ids: usize,
    pub failed_commits: Vec<String>,
    pub new_sightings: usize,
    pub prior_rows: usize,
    pub merged_rows: usize,
    pub tagged_references: usize,
    pub dataset_written: bool,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "checkpoint: {} -> {}",
            self.previous_checkpoint.as_deref().unwrap_or("<none>"),
            self.new_checkpoint.as_deref().unwrap_or("<none>")
        )?;
        writeln!(
            f,
            "commits: {} listed, {} processed, {} with ids, {} failed",
            self.commits_listed,
            self.commits_processed,
            self.commits_with_ids,
            self.failed_commits.len()
        )?;
        for hash in &self.failed_commits {
            writeln!(f, "  failed: {hash}")?;
        }
        write!(
            f,
            "sightings: {} new, {} prior rows, {} merged rows{}",
            self.new_sightings,
            self.prior_rows,
            self.merged_rows,
            if self.dataset_written { "" } else { " (dataset unchanged)" }
        )?;
        if self.tagged_references > 0 {
            write!(f, "\nreference tags: {}", self.tagged_references)?;
        }
        Ok(())
    }
}

/// Drives one crawl-and-merge run over its collaborators.
pub struct Driller {
    source: Arc<dyn CommitSource>,
    dataset: Arc<dyn SightingStore>,
    checkpoint: Arc<dyn CheckpointStore>,
    registry: Arc<IdentifierRegistry>,
    tagger: Option<Arc<dyn ReferenceTagger>>,
    options: DrillOptions,
}

impl Driller {
    pub fn new(
        source: Arc<dyn CommitSource>,
        dataset: Arc<dyn SightingStore>,
        checkpoint: Arc<dyn CheckpointStore>,
        registry: Arc<IdentifierRegistry>,
        options: DrillOptions,
    ) -> Self {
        Self {
            source,
            dataset,
            checkpoint,
            registry,
            tagger: None,
            options,
        }
    }

    /// Tag the earliest commit of each newly first-seen reference.
    pub fn with_tagger(mut self, tagger: Arc<dyn ReferenceTagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    pub async fn run(&self) -> Result<RunReport> {
        let checkpoint = Arc::clone(&self.checkpoint);
        let mut report = RunReport {
            previous_checkpoint: blocking(move || Ok(checkpoint.read()?)).await?,
            ..Default::default()
        };
        report.new_checkpoint = report.previous_checkpoint.clone();

        let source = Arc::clone(&self.source);
        let since = report.previous_checkpoint.clone();
        let range =
            tokio::task::spawn_blocking(move || source.list_commits(since.as_deref())).await??;
        report.commits_listed = range.commits.len();

        let Some(head) = range.head else {
            warn!("No commits found");
            return Ok(report);
        };

        if range.commits.is_empty() {
            info!("Already up to date at {}", head);
            if report.previous_checkpoint.as_deref() != Some(head.as_str()) {
                report.new_checkpoint = Some(self.advance_checkpoint(head).await?);
            }
            return Ok(report);
        }

        let extractor = Extractor::new(Arc::clone(&self.registry))
            .with_exclusions(&self.options.exclude_paths)?;
        let mut crawler = Crawler::new(
            Arc::clone(&self.source),
            Arc::new(extractor),
            self.options.workers,
        )
        .with_lock_policy(self.options.lock);
        if self.options.track_file_origins {
            crawler = crawler.with_origin_cache(Arc::new(FileOriginCache::new()));
        }

        let outcome = crawler.crawl(range.commits).await;
        report.commits_processed = outcome.processed;
        report.commits_with_ids = outcome.hits.len();
        report.failed_commits = outcome.failures.into_iter().map(|f: CommitFailure| f.hash).collect();
        report.failed_commits.sort();

        let new_rows: Vec<Sighting> = outcome
            .hits
            .into_iter()
            .flat_map(|hits| hits.into_sightings(&self.options.data_source))
            .collect();
        report.new_sightings = new_rows.len();

        if new_rows.is_empty() {
            info!("No new sightings");
        } else {
            let new_commits: HashSet<String> =
                new_rows.iter().map(|r| r.commit_hash.clone()).collect();

            let dataset = Arc::clone(&self.dataset);
            let prior = blocking(move || Ok(dataset.read_all()?)).await?;
            report.prior_rows = prior.len();

            let merged = merge::merge(prior, new_rows, self.options.key_scope);
            debug!(
                "Merge dropped {} duplicates and {} later sightings",
                merged.exact_duplicates, merged.superseded
            );
            report.merged_rows = merged.rows.len();

            let dataset = Arc::clone(&self.dataset);
            let rows = merged.rows;
            let rows = blocking(move || {
                dataset.write(&rows)?;
                Ok(rows)
            })
            .await?;
            report.dataset_written = true;

            if let Some(tagger) = &self.tagger {
                let tagger = Arc::clone(tagger);
                report.tagged_references =
                    blocking(move || Ok(tag_first_sightings(tagger.as_ref(), rows, &new_commits)))
                        .await?;
            }
        }

        info!("Advancing checkpoint to {}", head);
        report.new_checkpoint = Some(self.advance_checkpoint(head).await?);
        Ok(report)
    }

    async fn advance_checkpoint(&self, head: String) -> Result<String> {
        let checkpoint = Arc::clone(&self.checkpoint);
        blocking(move || {
            checkpoint.write(&head)?;
            Ok(head)
        })
        .await
    }
}

/// Run store or git I/O on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Tag the earliest commit of every reference whose first sighting came from
/// this run. Failures are logged only.
fn tag_first_sightings(
    tagger: &dyn ReferenceTagger,
    rows: Vec<Sighting>,
    new_commits: &HashSet<String>,
) -> usize {
    let earliest = merge::earliest_per_key(rows, KeyScope::Reference).rows;
    let mut tagged = 0;
    for row in earliest.iter().filter(|r| new_commits.contains(&r.commit_hash)) {
        info!("Tagging {} with {}", row.commit_hash, row.reference);
        match tagger.tag_reference(&row.reference, &row.commit_hash) {
            Ok(()) => tagged += 1,
            Err(e) => warn!("Could not tag {} with {}: {}", row.commit_hash, row.reference, e),
        }
    }
    tagged
}

/// Clone the repository if missing, pull it if HEAD is older than
/// `refresh_after`. Without a clone URL an existing repository is used as is.
pub fn refresh_repository(
    repo: &Path,
    clone_url: Option<&str>,
    refresh_after: Duration,
) -> std::result::Result<GitExecutor, GitMiningError> {
    if !repo.exists() {
        let Some(url) = clone_url else {
            return Err(GitMiningError::NotARepository(repo.to_path_buf()));
        };
        info!("No repo found at {}, cloning from {}", repo.display(), url);
        return GitExecutor::clone_repo(url, repo);
    }

    let executor = GitExecutor::new(repo)?;
    if clone_url.is_none() || executor.head()?.is_none() {
        return Ok(executor);
    }

    let last_update = executor.head_commit_time()?;
    let elapsed = (chrono::Utc::now() - last_update)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if elapsed < refresh_after {
        debug!(
            "Skipping pull ({}s of {}s elapsed)",
            elapsed.as_secs(),
            refresh_after.as_secs()
        );
        return Ok(executor);
    }

    info!("Pulling {} ({}s since last commit)", repo.display(), elapsed.as_secs());
    executor.pull()?;
    Ok(executor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::tests::{history, FakeSource};
    use crate::git_mining::TestRepo;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vul_driller_store::{JsonDatasetStore, MemoryCheckpointStore, StoreError};

    fn registry() -> Arc<IdentifierRegistry> {
        Arc::new(IdentifierRegistry::new().unwrap())
    }

    fn options() -> DrillOptions {
        DrillOptions {
            data_source: "fake".to_string(),
            workers: 3,
            ..Default::default()
        }
    }

    fn driller(
        source: Arc<dyn CommitSource>,
        dataset: Arc<dyn SightingStore>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Driller {
        Driller::new(source, dataset, checkpoint, registry(), options())
    }

    /// Checkpoint store whose first write fails.
    struct FlakyCheckpoint {
        inner: MemoryCheckpointStore,
        failures_left: AtomicUsize,
    }

    impl CheckpointStore for FlakyCheckpoint {
        fn read(&self) -> std::result::Result<Option<String>, StoreError> {
            self.inner.read()
        }

        fn write(&self, commit: &str) -> std::result::Result<(), StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::other("disk full"));
            }
            self.inner.write(commit)
        }
    }

    #[derive(Default)]
    struct RecordingTagger {
        tags: Mutex<Vec<(String, String)>>,
    }

    impl ReferenceTagger for RecordingTagger {
        fn tag_reference(&self, reference: &str, commit: &str) -> std::result::Result<(), GitMiningError> {
            if reference.starts_with("VU") {
                return Err(GitMiningError::CommandFailed("bad ref".to_string()));
            }
            self.tags.lock().push((reference.to_string(), commit.to_string()));
            Ok(())
        }
    }

    /// Wraps the stores and tagger, noting the thread of every call.
    #[derive(Default)]
    struct ThreadLog {
        threads: Mutex<Vec<(&'static str, std::thread::ThreadId)>>,
    }

    impl ThreadLog {
        fn note(&self, what: &'static str) {
            self.threads.lock().push((what, std::thread::current().id()));
        }
    }

    struct LoggedCheckpoint(MemoryCheckpointStore, Arc<ThreadLog>);

    impl CheckpointStore for LoggedCheckpoint {
        fn read(&self) -> std::result::Result<Option<String>, StoreError> {
            self.1.note("checkpoint read");
            self.0.read()
        }

        fn write(&self, commit: &str) -> std::result::Result<(), StoreError> {
            self.1.note("checkpoint write");
            self.0.write(commit)
        }
    }

    struct LoggedDataset(JsonDatasetStore, Arc<ThreadLog>);

    impl SightingStore for LoggedDataset {
        fn read_all(&self) -> std::result::Result<Vec<Sighting>, StoreError> {
            self.1.note("dataset read");
            self.0.read_all()
        }

        fn write(&self, rows: &[Sighting]) -> std::result::Result<(), StoreError> {
            self.1.note("dataset write");
            self.0.write(rows)
        }
    }

    struct LoggedTagger(Arc<ThreadLog>);

    impl ReferenceTagger for LoggedTagger {
        fn tag_reference(&self, _reference: &str, _commit: &str) -> std::result::Result<(), GitMiningError> {
            self.0.note("tag");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_and_tag_io_stay_off_the_async_thread() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ThreadLog::default());
        let dataset = Arc::new(LoggedDataset(
            JsonDatasetStore::new(dir.path(), "ds").unwrap(),
            Arc::clone(&log),
        ));
        let checkpoint = Arc::new(LoggedCheckpoint(MemoryCheckpointStore::new(), Arc::clone(&log)));

        driller(Arc::new(FakeSource::new(history())), dataset, checkpoint)
            .with_tagger(Arc::new(LoggedTagger(Arc::clone(&log))))
            .run()
            .await
            .unwrap();

        let runtime_thread = std::thread::current().id();
        let threads = log.threads.lock();
        let seen: HashSet<&str> = threads.iter().map(|(what, _)| *what).collect();
        assert_eq!(
            seen,
            HashSet::from(["checkpoint read", "checkpoint write", "dataset read", "dataset write", "tag"])
        );
        for (what, thread) in threads.iter() {
            assert_ne!(*thread, runtime_thread, "{what} ran on the runtime thread");
        }
    }

    #[tokio::test]
    async fn test_full_run_writes_dataset_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(dir.path(), "vul_sightings").unwrap());
        let checkpoint = Arc::new(MemoryCheckpointStore::new());
        let source = Arc::new(FakeSource::new(history()));

        let report = driller(source, dataset.clone(), checkpoint.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.commits_listed, 10);
        assert_eq!(report.commits_with_ids, 9);
        assert_eq!(report.new_sightings, 9);
        assert_eq!(report.merged_rows, 9);
        assert!(report.dataset_written);
        assert_eq!(checkpoint.read().unwrap(), Some("c10".to_string()));
        assert_eq!(report.new_checkpoint.as_deref(), Some("c10"));

        let rows = dataset.read_all().unwrap();
        assert_eq!(rows.len(), 9);
        assert!(rows.iter().all(|r| r.data_source == "fake"));
        assert!(rows.iter().all(|r| !r.reference.starts_with("CVE-2001")));
        assert!(dir.path().join("vul_sightings.csv").exists());
    }

    #[tokio::test]
    async fn test_incremental_runs_match_single_run() {
        let all = history();

        let one_dir = tempfile::tempdir().unwrap();
        let one = Arc::new(JsonDatasetStore::new(one_dir.path(), "ds").unwrap());
        driller(
            Arc::new(FakeSource::new(all.clone())),
            one.clone(),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .run()
        .await
        .unwrap();

        let two_dir = tempfile::tempdir().unwrap();
        let two = Arc::new(JsonDatasetStore::new(two_dir.path(), "ds").unwrap());
        let checkpoint = Arc::new(MemoryCheckpointStore::new());
        let first = driller(
            Arc::new(FakeSource::new(all[..5].to_vec())),
            two.clone(),
            checkpoint.clone(),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(first.new_checkpoint.as_deref(), Some("c05"));

        let second = driller(Arc::new(FakeSource::new(all)), two.clone(), checkpoint.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(second.commits_listed, 5);
        assert_eq!(second.previous_checkpoint.as_deref(), Some("c05"));

        assert_eq!(one.read_all().unwrap(), two.read_all().unwrap());
        assert_eq!(
            std::fs::read(one_dir.path().join("ds.json")).unwrap(),
            std::fs::read(two_dir.path().join("ds.json")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_checkpoint_failure_then_rerun_loses_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(dir.path(), "ds").unwrap());
        let checkpoint = Arc::new(FlakyCheckpoint {
            inner: MemoryCheckpointStore::new(),
            failures_left: AtomicUsize::new(1),
        });
        let source: Arc<dyn CommitSource> = Arc::new(FakeSource::new(history()));

        let crashed = driller(source.clone(), dataset.clone(), checkpoint.clone())
            .run()
            .await;
        assert!(crashed.is_err());
        assert_eq!(checkpoint.read().unwrap(), None);
        let after_crash = dataset.read_all().unwrap();
        assert_eq!(after_crash.len(), 9);

        let report = driller(source, dataset.clone(), checkpoint.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.commits_listed, 10);
        assert_eq!(checkpoint.read().unwrap(), Some("c10".to_string()));
        assert_eq!(dataset.read_all().unwrap(), after_crash);
    }

    #[tokio::test]
    async fn test_caught_up_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(dir.path(), "ds").unwrap());
        let checkpoint = Arc::new(MemoryCheckpointStore::with_marker("c10"));

        let report = driller(Arc::new(FakeSource::new(history())), dataset.clone(), checkpoint.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.commits_listed, 0);
        assert!(!report.dataset_written);
        assert_eq!(report.new_checkpoint.as_deref(), Some("c10"));
        assert!(dataset.prior_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(dir.path(), "ds").unwrap());
        let checkpoint = Arc::new(MemoryCheckpointStore::new());

        let report = driller(Arc::new(FakeSource::new(vec![])), dataset, checkpoint.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.new_checkpoint, None);
        assert_eq!(checkpoint.read().unwrap(), None);
    }

    #[tokio::test]
    async fn test_commits_without_ids_still_advance_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(dir.path(), "ds").unwrap());
        let checkpoint = Arc::new(MemoryCheckpointStore::with_marker("c09"));

        let report = driller(Arc::new(FakeSource::new(history())), dataset.clone(), checkpoint.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.commits_listed, 1);
        assert_eq!(report.new_sightings, 0);
        assert!(!report.dataset_written);
        assert_eq!(checkpoint.read().unwrap(), Some("c10".to_string()));
    }

    #[tokio::test]
    async fn test_failed_commits_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(dir.path(), "ds").unwrap());
        let mut fake = FakeSource::new(history());
        fake.fail = vec!["c04".to_string()];

        let report = driller(Arc::new(fake), dataset, Arc::new(MemoryCheckpointStore::new()))
            .run()
            .await
            .unwrap();

        assert_eq!(report.failed_commits, vec!["c04".to_string()]);
        assert_eq!(report.new_sightings, 8);
        assert!(report.to_string().contains("failed: c04"));
    }

    #[tokio::test]
    async fn test_reference_tagging() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(dir.path(), "ds").unwrap());
        let mut commits = history();
        commits[9].message = "also VU#1234 and CVE-2020-0001".to_string();
        let tagger = Arc::new(RecordingTagger::default());

        let report = driller(
            Arc::new(FakeSource::new(commits)),
            dataset,
            Arc::new(MemoryCheckpointStore::new()),
        )
        .with_tagger(tagger.clone())
        .run()
        .await
        .unwrap();

        let tags = tagger.tags.lock().clone();
        assert_eq!(report.tagged_references, tags.len());
        // 5 CVEs and 4 BIDs; VU tag fails
        assert_eq!(tags.len(), 9);
        assert!(tags.contains(&("CVE-2020-0001".to_string(), "c01".to_string())));
        assert!(!tags.iter().any(|(_, c)| c == "c10"));
    }

    #[tokio::test]
    async fn test_git_backed_run() {
        use crate::git_mining::{GitCommitSource, GitTagCheckpointStore};

        let Some(repo) = TestRepo::init() else { return };
        repo.commit(
            &[("modules/exploit.rb", "'References' => [['CVE', '2014-0160']]\n")],
            "Add heartbleed module",
            "2020-01-01 00:00:00 +0000",
        );
        let c2 = repo.commit(
            &[("modules/exploit.rb", "# see OSVDB-1\n")],
            "Fix CVE-2014-0160 description, see MS08-067",
            "2020-01-02 00:00:00 +0000",
        );

        let out = tempfile::tempdir().unwrap();
        let dataset = Arc::new(JsonDatasetStore::new(out.path(), "ds").unwrap());
        let checkpoint = Arc::new(GitTagCheckpointStore::new(repo.executor(), "last_run"));
        let source = Arc::new(GitCommitSource::new(repo.executor()));

        let report = driller(source, dataset.clone(), checkpoint.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.failed_commits, Vec::<String>::new());
        assert_eq!(checkpoint.read().unwrap(), Some(c2.clone()));

        let rows = dataset.read_all().unwrap();
        let keys: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.reference.as_str(), r.origin_path.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("CVE-2014-0160", "modules/exploit.rb"),
                ("CVE-2014-0160", "COMMIT_MESSAGE"),
                ("MS08-067", "COMMIT_MESSAGE"),
                ("OSVDB-1", "modules/exploit.rb"),
            ]
        );
    }

    #[test]
    fn test_refresh_without_repo_or_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("repo");
        assert!(refresh_repository(&missing, None, Duration::ZERO).is_err());
    }

    #[test]
    fn test_refresh_clones_then_skips_recent_pull() {
        let Some(upstream) = TestRepo::init() else { return };
        let head = upstream.commit(&[("a", "1")], "one", "2020-01-01 00:00:00 +0000");

        let dir = tempfile::tempdir().unwrap();
        let clone = dir.path().join("clone");
        let url = upstream.path().to_string_lossy().into_owned();

        let exec = refresh_repository(&clone, Some(&url), Duration::from_secs(3600)).unwrap();
        assert_eq!(exec.head().unwrap(), Some(head.clone()));

        // HEAD is years old, so this pulls; nothing new upstream
        let exec = refresh_repository(&clone, Some(&url), Duration::from_secs(3600)).unwrap();
        assert_eq!(exec.head().unwrap(), Some(head));
    }
}
