//! Extraction stage: commit content in, identifier mentions out.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use vul_driller_store::{Sighting, COMMIT_MESSAGE_ORIGIN};

use crate::git_mining::{CommitRecord, CommitSource, FileOrigin, Identity};
use crate::registry::IdentifierRegistry;

/// (canonical identifier, origin) where origin is a path or `COMMIT_MESSAGE`.
pub type Mention = (String, String);

/// Scans commit messages and added lines with an [`IdentifierRegistry`].
pub struct Extractor {
    registry: Arc<IdentifierRegistry>,
    exclude: Option<GlobSet>,
}

impl Extractor {
    pub fn new(registry: Arc<IdentifierRegistry>) -> Self {
        Self {
            registry,
            exclude: None,
        }
    }

    /// Skip files whose path matches any of `patterns`.
    pub fn with_exclusions(mut self, patterns: &[String]) -> Result<Self, globset::Error> {
        if patterns.is_empty() {
            self.exclude = None;
            return Ok(self);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        self.exclude = Some(builder.build()?);
        Ok(self)
    }

    pub fn registry(&self) -> &IdentifierRegistry {
        &self.registry
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.exclude.as_ref().is_some_and(|set| set.is_match(path))
    }

    /// Distinct mentions in the message and the added lines of `commit`.
    /// Removed lines are never scanned.
    pub fn extract(&self, commit: &CommitRecord) -> BTreeSet<Mention> {
        let mut mentions = BTreeSet::new();

        for id in self.registry.find(&commit.message) {
            mentions.insert((id, COMMIT_MESSAGE_ORIGIN.to_string()));
        }

        for file in &commit.modifications {
            let Some(path) = file.new_path.as_deref() else {
                continue;
            };
            if self.is_excluded(path) {
                continue;
            }
            for (_, line) in &file.added_lines {
                for id in self.registry.find(line) {
                    mentions.insert((id, path.to_string()));
                }
            }
        }

        if !mentions.is_empty() {
            debug!("{}: matched {} ids", commit.hash, mentions.len());
        }
        mentions
    }
}

/// Commit header plus its mentions; what survives extraction.
#[derive(Debug, Clone)]
pub struct CommitHits {
    pub hash: String,
    pub parents: Vec<String>,
    pub author: Identity,
    pub author_date: DateTime<Utc>,
    pub committer: Identity,
    pub committer_date: DateTime<Utc>,
    pub mentions: BTreeSet<Mention>,
    pub origins: Vec<(String, FileOrigin)>,
}

impl CommitHits {
    pub fn new(commit: &CommitRecord, mentions: BTreeSet<Mention>) -> Self {
        Self {
            hash: commit.hash.clone(),
            parents: commit.parents.clone(),
            author: commit.author.clone(),
            author_date: commit.author_date,
            committer: commit.committer.clone(),
            committer_date: commit.committer_date,
            mentions,
            origins: Vec::new(),
        }
    }

    /// Look up origin dates for every file path mentioned.
    pub fn resolve_origins(&mut self, cache: &FileOriginCache, source: &dyn CommitSource) {
        let paths: BTreeSet<&str> = self
            .mentions
            .iter()
            .map(|(_, origin)| origin.as_str())
            .filter(|origin| *origin != COMMIT_MESSAGE_ORIGIN)
            .collect();
        self.origins = paths
            .into_iter()
            .filter_map(|path| cache.get_or_load(path, source).map(|o| (path.to_string(), o)))
            .collect();
    }

    /// One sighting per mention.
    pub fn into_sightings(self, data_source: &str) -> Vec<Sighting> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        self.mentions
            .iter()
            .map(|(reference, origin)| {
                let file_origin = self
                    .origins
                    .iter()
                    .find(|(path, _)| path == origin)
                    .map(|(_, o)| *o);
                Sighting {
                    reference: reference.clone(),
                    origin_path: origin.clone(),
                    commit_hash: self.hash.clone(),
                    author_name: self.author.name.clone(),
                    author_email: non_empty(&self.author.email),
                    author_date: self.author_date,
                    committer_name: self.committer.name.clone(),
                    committer_email: non_empty(&self.committer.email),
                    committer_date: self.committer_date,
                    data_source: data_source.to_string(),
                    parents: self.parents.clone(),
                    file_author_init_date: file_origin.map(|o| o.author_date),
                    file_committer_init_date: file_origin.map(|o| o.committer_date),
                }
            })
            .collect()
    }
}

/// First-seen dates per path, memoised for one run.
#[derive(Default)]
pub struct FileOriginCache {
    entries: DashMap<String, Option<FileOrigin>>,
}

impl FileOriginCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached origin of `path`, asking `source` on a miss. Lookup failures
    /// are cached as unknown.
    pub fn get_or_load(&self, path: &str, source: &dyn CommitSource) -> Option<FileOrigin> {
        if let Some(hit) = self.entries.get(path) {
            return *hit;
        }
        let origin = match source.file_origin(path) {
            Ok(origin) => origin,
            Err(e) => {
                warn!("No origin dates for {}: {}", path, e);
                None
            }
        };
        self.entries.insert(path.to_string(), origin);
        origin
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::git_mining::{CommitRange, FileModification, GitMiningError};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn record(hash: &str, day: u32, message: &str, files: &[(&str, &[&str], &[&str])]) -> CommitRecord {
        let date = Utc.with_ymd_and_hms(2020, 1, day, 12, 0, 0).unwrap();
        CommitRecord {
            hash: hash.to_string(),
            parents: vec![],
            author: Identity {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
            },
            author_date: date,
            committer: Identity {
                name: "Bob".to_string(),
                email: String::new(),
            },
            committer_date: date,
            message: message.to_string(),
            modifications: files
                .iter()
                .map(|(path, added, removed)| FileModification {
                    old_path: Some(path.to_string()),
                    new_path: Some(path.to_string()),
                    added_lines: added.iter().enumerate().map(|(i, l)| (i + 1, l.to_string())).collect(),
                    removed_lines: removed.iter().enumerate().map(|(i, l)| (i + 1, l.to_string())).collect(),
                })
                .collect(),
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(Arc::new(IdentifierRegistry::new().unwrap()))
    }

    #[test]
    fn test_extract_message_and_added_lines() {
        let commit = record(
            "c1",
            1,
            "Fix CVE-2020-0001 and cve_2020_0001",
            &[("mod.rb", &["'References' => [['CVE', '2020-0002']]", "# CVE-2020-0002"], &[])],
        );
        let mentions = extractor().extract(&commit);
        assert_eq!(
            mentions,
            BTreeSet::from([
                ("CVE-2020-0001".to_string(), "COMMIT_MESSAGE".to_string()),
                ("CVE-2020-0002".to_string(), "mod.rb".to_string()),
            ])
        );
    }

    #[test]
    fn test_removed_lines_never_produce_mentions() {
        let commit = record("c1", 1, "cleanup", &[("a.txt", &[], &["CVE-2019-9999"])]);
        assert!(extractor().extract(&commit).is_empty());
    }

    #[test]
    fn test_deleted_file_is_skipped() {
        let mut commit = record("c1", 1, "rm", &[("a.txt", &["CVE-2019-1"], &[])]);
        commit.modifications[0].new_path = None;
        assert!(extractor().extract(&commit).is_empty());
    }

    #[test]
    fn test_exclusions() {
        let commit = record(
            "c1",
            1,
            "",
            &[
                ("vendor/lib.js", &["CVE-2020-1"], &[]),
                ("src/main.c", &["CVE-2020-2"], &[]),
            ],
        );
        let ex = extractor()
            .with_exclusions(&["vendor/**".to_string()])
            .unwrap();
        assert_eq!(
            ex.extract(&commit),
            BTreeSet::from([("CVE-2020-2".to_string(), "src/main.c".to_string())])
        );
        assert!(extractor().with_exclusions(&["[".to_string()]).is_err());
    }

    #[test]
    fn test_into_sightings() {
        let commit = record("c1", 3, "CVE-2020-0001", &[("a.rb", &["BID-1"], &[])]);
        let mentions = extractor().extract(&commit);
        let rows = CommitHits::new(&commit, mentions).into_sightings("repo");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].reference, "BID-1");
        assert_eq!(rows[0].origin_path, "a.rb");
        assert_eq!(rows[1].origin_path, "COMMIT_MESSAGE");
        assert!(rows.iter().all(|r| r.commit_hash == "c1" && r.data_source == "repo"));
        assert_eq!(rows[0].author_email.as_deref(), Some("alice@example.com"));
        assert_eq!(rows[0].committer_email, None);
        assert_eq!(rows[0].file_author_init_date, None);
    }

    struct CountingSource {
        lookups: AtomicUsize,
    }

    impl CommitSource for CountingSource {
        fn list_commits(&self, _since: Option<&str>) -> Result<CommitRange, GitMiningError> {
            Ok(CommitRange::default())
        }

        fn load(&self, hash: &str) -> Result<CommitRecord, GitMiningError> {
            Err(GitMiningError::parse(hash))
        }

        fn file_origin(&self, path: &str) -> Result<Option<FileOrigin>, GitMiningError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if path == "broken" {
                return Err(GitMiningError::CommandFailed("boom".to_string()));
            }
            let date = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
            Ok(Some(FileOrigin {
                author_date: date,
                committer_date: date,
            }))
        }
    }

    #[test]
    fn test_file_origin_cache_memoises() {
        let source = CountingSource {
            lookups: AtomicUsize::new(0),
        };
        let cache = FileOriginCache::new();

        assert!(cache.get_or_load("a.rb", &source).is_some());
        assert!(cache.get_or_load("a.rb", &source).is_some());
        assert_eq!(cache.get_or_load("broken", &source), None);
        assert_eq!(cache.get_or_load("broken", &source), None);
        assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);

        let commit = record("c1", 3, "CVE-2020-0001", &[("a.rb", &["BID-1"], &[])]);
        let mut hits = CommitHits::new(&commit, extractor().extract(&commit));
        hits.resolve_origins(&cache, &source);
        let rows = hits.into_sightings("repo");
        assert!(rows[0].file_author_init_date.is_some());
        assert_eq!(rows[1].file_author_init_date, None);
        assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
    }
}
