//! Metasploit Framework module metadata.
//!
//! `db/modules_metadata_base.json` lists every module with its references.
//! Each raw reference is kept, plus every identifier found inside it, so a
//! `URL-https://www.kb.cert.org/vuls/id/123` entry also yields `VU#123`.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::registry::{FamilyTag, IdentifierRegistry};

/// Metadata file, relative to the repository root.
pub const METADATA_FILE: &str = "db/modules_metadata_base.json";
/// Output file name.
pub const OUTPUT_FILE: &str = "vul_mentions_metasploit_metadata_base.json";
/// Value of the `source` column.
pub const SOURCE: &str = "metasploit_framework_db";

#[derive(Debug, Deserialize)]
struct ModuleMetadata {
    #[serde(default)]
    description: String,
    #[serde(default)]
    disclosure_date: Option<String>,
    #[serde(default)]
    mod_time: Option<String>,
    #[serde(default)]
    path: String,
    #[serde(default)]
    references: Vec<String>,
}

/// One (reference, module) row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleReference {
    pub reference: String,
    pub disclosure_date: Option<NaiveDate>,
    pub mod_time: Option<DateTime<Utc>>,
    pub path: String,
    pub description: String,
    pub source: String,
}

fn parse_mod_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S %z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw.trim()))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn parse_disclosure_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Rows for every module in `json`, de-duplicated and sorted by `mod_time`.
pub fn parse_metadata(json: &str, registry: &IdentifierRegistry) -> Result<Vec<ModuleReference>> {
    let modules: BTreeMap<String, ModuleMetadata> = serde_json::from_str(json)?;
    debug!("Parsed {} modules", modules.len());

    let mut rows = Vec::new();
    for (key, module) in modules {
        let mod_time = module.mod_time.as_deref().and_then(parse_mod_time);
        if module.mod_time.is_some() && mod_time.is_none() {
            warn!("Module {} has an unreadable mod_time", key);
        }
        let disclosure_date = module.disclosure_date.as_deref().and_then(parse_disclosure_date);
        let description = module.description.split_whitespace().collect::<Vec<_>>().join(" ");

        for raw in &module.references {
            let found = registry.find(raw);
            for reference in std::iter::once(raw.clone()).chain(found) {
                rows.push(ModuleReference {
                    reference,
                    disclosure_date,
                    mod_time,
                    path: module.path.clone(),
                    description: description.clone(),
                    source: SOURCE.to_string(),
                });
            }
        }
    }

    rows.sort_by(|a, b| a.mod_time.cmp(&b.mod_time).then_with(|| a.cmp(b)));
    rows.dedup();
    Ok(rows)
}

/// Read and parse the metadata file of a Metasploit checkout.
pub fn load_metadata(repo: &Path, registry: &IdentifierRegistry) -> Result<Vec<ModuleReference>> {
    let path = repo.join(METADATA_FILE);
    info!("Reading module metadata from {}", path.display());
    let json = std::fs::read_to_string(&path)?;
    parse_metadata(&json, registry)
}

/// Write `rows` to [`OUTPUT_FILE`] in `output_dir`.
pub fn write_references(rows: &[ModuleReference], output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join(OUTPUT_FILE);
    vul_driller_store::write_json_atomic(&path, rows)?;
    info!("Wrote {} module references to {}", rows.len(), path.display());
    Ok(path)
}

/// CVE rows, optionally only those modified at or after `since`.
pub fn cve_rows<'a>(
    rows: &'a [ModuleReference],
    registry: &IdentifierRegistry,
    since: Option<DateTime<Utc>>,
) -> Vec<&'a ModuleReference> {
    rows.iter()
        .filter(|r| registry.family_of(&r.reference) == Some(FamilyTag::Cve))
        .filter(|r| match since {
            Some(since) => r.mod_time.is_some_and(|t| t >= since),
            None => true,
        })
        .collect()
}

/// Instant `days` days before `now`. `None` for negative or out of range
/// values.
pub fn recent_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if days < 0 {
        return None;
    }
    now.checked_sub_signed(TimeDelta::try_days(days)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"{
      "exploit_windows/smb/ms08_067_netapi": {
        "name": "MS08-067 Microsoft Server Service Relative Path Stack Corruption",
        "fullname": "exploit/windows/smb/ms08_067_netapi",
        "description": "This module exploits a parsing flaw\n      in the path canonicalization code",
        "disclosure_date": "2008-10-28",
        "mod_time": "2020-09-22 02:53:06 +0000",
        "path": "/modules/exploits/windows/smb/ms08_067_netapi.rb",
        "references": ["CVE-2008-4250", "OSVDB-49243", "MSB-MS08-067", "URL-http://www.kb.cert.org/vuls/id/827267"]
      },
      "auxiliary_scanner/ssl/openssl_heartbleed": {
        "description": "Heartbleed",
        "disclosure_date": null,
        "mod_time": "2019-01-01 00:00:00 +0000",
        "path": "/modules/auxiliary/scanner/ssl/openssl_heartbleed.rb",
        "references": ["CVE-2014-0160", "CVE-2014-0160"]
      }
    }"#;

    fn registry() -> IdentifierRegistry {
        IdentifierRegistry::new().unwrap()
    }

    #[test]
    fn test_parse_metadata() {
        let rows = parse_metadata(SAMPLE, &registry()).unwrap();
        let refs: Vec<&str> = rows.iter().map(|r| r.reference.as_str()).collect();

        // heartbleed is older, so its row comes first; duplicates collapse
        assert_eq!(refs[0], "CVE-2014-0160");
        assert_eq!(refs.iter().filter(|r| **r == "CVE-2014-0160").count(), 1);
        assert!(refs.contains(&"MSB-MS08-067"));
        assert!(refs.contains(&"MS08-067"));
        assert!(refs.contains(&"URL-http://www.kb.cert.org/vuls/id/827267"));
        assert!(refs.contains(&"VU#827267"));
        assert_eq!(rows.len(), 7);

        let ms = rows.iter().find(|r| r.reference == "CVE-2008-4250").unwrap();
        assert_eq!(
            ms.description,
            "This module exploits a parsing flaw in the path canonicalization code"
        );
        assert_eq!(ms.disclosure_date, NaiveDate::from_ymd_opt(2008, 10, 28));
        assert_eq!(ms.source, SOURCE);
        assert_eq!(rows[0].disclosure_date, None);
    }

    #[test]
    fn test_cve_rows_since() {
        let reg = registry();
        let rows = parse_metadata(SAMPLE, &reg).unwrap();

        assert_eq!(cve_rows(&rows, &reg, None).len(), 2);
        let since = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let recent = cve_rows(&rows, &reg, Some(since));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].reference, "CVE-2008-4250");
    }

    #[test]
    fn test_load_and_write() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("db")).unwrap();
        std::fs::write(repo.path().join(METADATA_FILE), SAMPLE).unwrap();
        let out = tempfile::tempdir().unwrap();

        let rows = load_metadata(repo.path(), &registry()).unwrap();
        let path = write_references(&rows, out.path()).unwrap();

        let back: Vec<ModuleReference> = vul_driller_store::read_json(&path).unwrap();
        assert_eq!(back, rows);
        assert!(load_metadata(out.path(), &registry()).is_err());
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(parse_metadata("[1, 2", &registry()).is_err());
    }

    #[test]
    fn test_recent_cutoff_rejects_out_of_range_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(
            recent_cutoff(now, 10),
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap())
        );
        assert_eq!(recent_cutoff(now, 0), Some(now));
        assert_eq!(recent_cutoff(now, -1), None);
        assert_eq!(recent_cutoff(now, i64::MAX), None);
        assert_eq!(recent_cutoff(now, 200_000_000), None);
    }
}
