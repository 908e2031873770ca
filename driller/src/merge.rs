//! Merge/dedup stage.
//!
//! Old and new sightings are pooled, exact duplicates dropped and, per key,
//! only the row with the earliest author date kept. Rows come out sorted by
//! reference, then author date, then the remaining fields, so the result does
//! not depend on input order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use vul_driller_store::Sighting;

/// Which rows compete for "earliest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScope {
    /// One row per (reference, origin_path).
    #[default]
    File,
    /// One row per reference.
    Reference,
}

impl KeyScope {
    fn key(&self, row: &Sighting) -> (String, Option<String>) {
        match self {
            KeyScope::File => (row.reference.clone(), Some(row.origin_path.clone())),
            KeyScope::Reference => (row.reference.clone(), None),
        }
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyScope::File => f.write_str("file"),
            KeyScope::Reference => f.write_str("reference"),
        }
    }
}

impl FromStr for KeyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(KeyScope::File),
            "reference" | "ref" => Ok(KeyScope::Reference),
            other => Err(format!("unknown key scope {other:?} (expected file or reference)")),
        }
    }
}

/// Merged dataset and what was dropped on the way.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub rows: Vec<Sighting>,
    /// Rows identical to another row apart from `parents`.
    pub exact_duplicates: usize,
    /// Rows beaten by an earlier row with the same key.
    pub superseded: usize,
}

/// Sort `rows` and keep the earliest row per key.
pub fn earliest_per_key(mut rows: Vec<Sighting>, scope: KeyScope) -> MergeOutcome {
    rows.sort_by(Sighting::chronological_cmp);

    let total = rows.len();
    // equal row keys sort next to each other
    rows.dedup_by(|a, b| a.row_key() == b.row_key());
    let exact_duplicates = total - rows.len();

    let unique = rows.len();
    let mut seen = HashSet::with_capacity(unique);
    rows.retain(|row| seen.insert(scope.key(row)));
    let superseded = unique - rows.len();

    MergeOutcome {
        rows,
        exact_duplicates,
        superseded,
    }
}

/// Pool `prior` and `new` and reduce them to one row per key.
pub fn merge(prior: Vec<Sighting>, new: Vec<Sighting>, scope: KeyScope) -> MergeOutcome {
    let mut rows = prior;
    rows.extend(new);
    earliest_per_key(rows, scope)
}
