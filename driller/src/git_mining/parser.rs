//! Git output parsing for single-commit views.

use super::GitMiningError;
use chrono::{DateTime, Utc};

/// Separates header fields.
pub const FIELD_SEPARATOR: char = '\u{1f}';
/// Ends the header; the patch follows.
pub const HEADER_TERMINATOR: char = '\u{1e}';

/// Header format for `git log -1 -p`.
pub const SHOW_FORMAT: &str = concat!(
    "%H", "%x1f", // hash
    "%P", "%x1f", // parents
    "%an", "%x1f", // author name
    "%ae", "%x1f", // author email
    "%aI", "%x1f", // author date (strict ISO 8601)
    "%cn", "%x1f", // committer name
    "%ce", "%x1f", // committer email
    "%cI", "%x1f", // committer date
    "%B", "%x1e"   // raw body
);

/// Name and email of an author or committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// One file touched by a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileModification {
    /// Path before the change, `None` for added files.
    pub old_path: Option<String>,
    /// Path after the change, `None` for deleted files.
    pub new_path: Option<String>,
    /// Added lines as (new line number, text).
    pub added_lines: Vec<(usize, String)>,
    /// Removed lines as (old line number, text).
    pub removed_lines: Vec<(usize, String)>,
}

impl FileModification {
    /// Path the change is attributed to.
    pub fn path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

/// Full content of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub hash: String,
    pub parents: Vec<String>,
    pub author: Identity,
    pub author_date: DateTime<Utc>,
    pub committer: Identity,
    pub committer_date: DateTime<Utc>,
    pub message: String,
    pub modifications: Vec<FileModification>,
}

impl CommitRecord {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<DateTime<Utc>, GitMiningError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| GitMiningError::parse(format!("bad date {raw:?}: {e}")))
}

/// Parse the output of `git log -1 -p --format=SHOW_FORMAT`.
pub fn parse_commit(output: &str) -> Result<CommitRecord, GitMiningError> {
    let (header, patch) = output
        .split_once(HEADER_TERMINATOR)
        .ok_or_else(|| GitMiningError::parse("missing header terminator"))?;

    let fields: Vec<&str> = header.splitn(9, FIELD_SEPARATOR).collect();
    if fields.len() < 9 {
        return Err(GitMiningError::parse(format!(
            "expected 9 header fields, found {}",
            fields.len()
        )));
    }

    let hash = fields[0].trim().to_string();
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GitMiningError::parse(format!("bad commit hash {hash:?}")));
    }

    Ok(CommitRecord {
        hash,
        parents: fields[1].split_whitespace().map(String::from).collect(),
        author: Identity {
            name: fields[2].to_string(),
            email: fields[3].to_string(),
        },
        author_date: parse_date(fields[4])?,
        committer: Identity {
            name: fields[5].to_string(),
            email: fields[6].to_string(),
        },
        committer_date: parse_date(fields[7])?,
        message: fields[8].trim_end().to_string(),
        modifications: parse_patch(patch),
    })
}

fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

/// `a/foo` -> `foo`, `/dev/null` -> `None`.
fn diff_path(raw: &str, prefix: &str) -> Option<String> {
    let raw = unquote(raw.trim_end_matches('\t').trim());
    if raw == "/dev/null" {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

/// Paths from `diff --git a/x b/y`; only used until `---`/`+++` or rename
/// lines say otherwise.
fn header_paths(rest: &str) -> (Option<String>, Option<String>) {
    let rest = rest.trim();
    // unchanged path: "a/P b/P"
    if rest.len() % 2 == 1 {
        let half = rest.len() / 2;
        if rest.is_char_boundary(half) {
            let (left, right) = rest.split_at(half);
            if let (Some(l), Some(r)) = (left.strip_prefix("a/"), right.strip_prefix(" b/")) {
                if l == r {
                    return (Some(l.to_string()), Some(r.to_string()));
                }
            }
        }
    }
    match rest.split_once(" b/") {
        Some((left, right)) => (
            Some(left.strip_prefix("a/").unwrap_or(left).to_string()),
            Some(right.to_string()),
        ),
        None => (None, None),
    }
}

/// `@@ -12,3 +14,0 @@` -> (12, 14)
fn hunk_start(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.split_whitespace().skip(1);
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let first = |s: &str| s.split(',').next().and_then(|n| n.parse::<usize>().ok());
    Some((first(old)?, first(new)?))
}

/// Parse a zero-context unified patch into per-file modifications.
pub fn parse_patch(patch: &str) -> Vec<FileModification> {
    let mut files = Vec::new();
    let mut current: Option<FileModification> = None;
    let mut in_hunk = false;
    let (mut old_line, mut new_line) = (0usize, 0usize);

    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            files.extend(current.take());
            let (old_path, new_path) = header_paths(rest);
            current = Some(FileModification {
                old_path,
                new_path,
                ..Default::default()
            });
            in_hunk = false;
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("@@") {
            if let Some((old, new)) = hunk_start(line) {
                old_line = old;
                new_line = new;
                in_hunk = true;
            }
            continue;
        }

        if in_hunk {
            match line.as_bytes().first() {
                Some(b'+') => {
                    file.added_lines.push((new_line, line[1..].to_string()));
                    new_line += 1;
                    continue;
                }
                Some(b'-') => {
                    file.removed_lines.push((old_line, line[1..].to_string()));
                    old_line += 1;
                    continue;
                }
                Some(b' ') => {
                    old_line += 1;
                    new_line += 1;
                    continue;
                }
                Some(b'\\') => continue,
                _ => in_hunk = false,
            }
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            file.old_path = diff_path(rest, "a/");
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            file.new_path = diff_path(rest, "b/");
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            file.old_path = Some(unquote(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            file.new_path = Some(unquote(rest).to_string());
        } else if line.starts_with("new file mode") {
            file.old_path = None;
        } else if line.starts_with("deleted file mode") {
            file.new_path = None;
        }
    }

    files.extend(current);
    files
}
