//! Sighting rows
//!
//! One row of the persisted dataset: a canonical identifier observed at one
//! origin (commit message or file path) in one commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Origin label used for identifiers found in a commit message
pub const COMMIT_MESSAGE_ORIGIN: &str = "COMMIT_MESSAGE";

/// A single identifier sighting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    /// Canonical identifier, e.g. `CVE-2021-1234`
    pub reference: String,

    /// File path the identifier was added to, or `COMMIT_MESSAGE`
    #[serde(alias = "fpath")]
    pub origin_path: String,

    /// Commit that introduced the mention
    #[serde(alias = "hash")]
    pub commit_hash: String,

    pub author_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,

    pub author_date: DateTime<Utc>,

    pub committer_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer_email: Option<String>,

    pub committer_date: DateTime<Utc>,

    /// Where the commit came from (clone URL or repository name)
    #[serde(default)]
    pub data_source: String,

    /// Parent hashes; multi-valued, never part of row equality
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,

    /// First author date of `origin_path` in the repository, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_author_init_date: Option<DateTime<Utc>>,

    /// First committer date of `origin_path` in the repository, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_committer_init_date: Option<DateTime<Utc>>,
}

/// Borrowed view of every single-valued field of a [`Sighting`]
pub type RowKey<'a> = (
    &'a str,
    &'a str,
    &'a str,
    &'a str,
    Option<&'a str>,
    DateTime<Utc>,
    &'a str,
    Option<&'a str>,
    DateTime<Utc>,
    &'a str,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

impl Sighting {
    /// Whether this sighting came from a commit message
    pub fn is_commit_message(&self) -> bool {
        self.origin_path == COMMIT_MESSAGE_ORIGIN
    }

    /// Key used for exact-duplicate detection.
    ///
    /// Covers every field except `parents`.
    pub fn row_key(&self) -> RowKey<'_> {
        (
            &self.reference,
            &self.origin_path,
            &self.commit_hash,
            &self.author_name,
            self.author_email.as_deref(),
            self.author_date,
            &self.committer_name,
            self.committer_email.as_deref(),
            self.committer_date,
            &self.data_source,
            self.file_author_init_date,
            self.file_committer_init_date,
        )
    }

    /// Total order: reference, then author date, then the remaining fields.
    ///
    /// Two rows compare equal only when their `row_key`s are equal.
    pub fn chronological_cmp(&self, other: &Self) -> Ordering {
        self.reference
            .cmp(&other.reference)
            .then(self.author_date.cmp(&other.author_date))
            .then_with(|| self.row_key().cmp(&other.row_key()))
    }
}

/// CSV projection of a [`Sighting`] (drops `parents`)
#[derive(Debug, Serialize)]
pub(crate) struct SightingCsvRow<'a> {
    reference: &'a str,
    origin_path: &'a str,
    commit_hash: &'a str,
    author_name: &'a str,
    author_email: Option<&'a str>,
    author_date: DateTime<Utc>,
    committer_name: &'a str,
    committer_email: Option<&'a str>,
    committer_date: DateTime<Utc>,
    data_source: &'a str,
    file_author_init_date: Option<DateTime<Utc>>,
    file_committer_init_date: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Sighting> for SightingCsvRow<'a> {
    fn from(s: &'a Sighting) -> Self {
        Self {
            reference: &s.reference,
            origin_path: &s.origin_path,
            commit_hash: &s.commit_hash,
            author_name: &s.author_name,
            author_email: s.author_email.as_deref(),
            author_date: s.author_date,
            committer_name: &s.committer_name,
            committer_email: s.committer_email.as_deref(),
            committer_date: s.committer_date,
            data_source: &s.data_source,
            file_author_init_date: s.file_author_init_date,
            file_committer_init_date: s.file_committer_init_date,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sighting(reference: &str, origin: &str, hash: &str, day: u32) -> Sighting {
        let date = Utc.with_ymd_and_hms(2020, 1, day, 12, 0, 0).unwrap();
        Sighting {
            reference: reference.to_string(),
            origin_path: origin.to_string(),
            commit_hash: hash.to_string(),
            author_name: "alice".to_string(),
            author_email: Some("alice@example.com".to_string()),
            author_date: date,
            committer_name: "bob".to_string(),
            committer_email: None,
            committer_date: date,
            data_source: "test".to_string(),
            parents: vec!["p1".to_string()],
            file_author_init_date: None,
            file_committer_init_date: None,
        }
    }

    #[test]
    fn test_row_key_ignores_parents() {
        let a = sighting("CVE-2020-0001", "a.rb", "c1", 1);
        let mut b = a.clone();
        b.parents = vec!["other".to_string(), "merge".to_string()];
        assert_eq!(a.row_key(), b.row_key());
        assert_ne!(a, b);
    }

    #[test]
    fn test_chronological_cmp_orders_by_reference_then_date() {
        let early = sighting("CVE-2020-0002", "a.rb", "c1", 1);
        let late = sighting("CVE-2020-0002", "a.rb", "c2", 5);
        let other = sighting("CVE-2020-0001", "z.rb", "c3", 9);

        assert_eq!(early.chronological_cmp(&late), Ordering::Less);
        assert_eq!(other.chronological_cmp(&early), Ordering::Less);
        assert_eq!(early.chronological_cmp(&early.clone()), Ordering::Equal);
    }

    #[test]
    fn test_legacy_field_names_deserialize() {
        let json = r#"{
            "reference": "BID-10108",
            "fpath": "COMMIT_MESSAGE",
            "hash": "abc123",
            "author_name": "alice",
            "author_date": "2020-03-27T13:45:00.000Z",
            "committer_name": "bob",
            "committer_date": "2020-03-27T13:45:00.000Z",
            "data_source": "metasploit_git",
            "msg": "ignored extra column",
            "branches": ["master"]
        }"#;
        let s: Sighting = serde_json::from_str(json).unwrap();
        assert_eq!(s.origin_path, COMMIT_MESSAGE_ORIGIN);
        assert_eq!(s.commit_hash, "abc123");
        assert!(s.is_commit_message());
        assert!(s.parents.is_empty());
    }

    #[test]
    fn test_dates_serialize_as_utc_iso8601() {
        let s = sighting("CVE-2020-0001", "a.rb", "c1", 3);
        let value = serde_json::to_value(&s).unwrap();
        assert_eq!(value["author_date"], "2020-01-03T12:00:00Z");
        assert!(value.get("file_author_init_date").is_none());
    }
}
