//! Dataset persistence
//!
//! The sighting dataset lives in one directory as `<basename>.json` plus a CSV
//! projection `<basename>.csv`. Any other `<basename>*.json` file there (for
//! example per-run dumps from older tooling) is treated as prior data: it is
//! read on merge and removed once the merged dataset has been written.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};
use crate::sighting::{Sighting, SightingCsvRow};

/// Persistence contract for the sighting dataset
pub trait SightingStore: Send + Sync {
    /// Read every row of every prior dataset file
    fn read_all(&self) -> Result<Vec<Sighting>>;

    /// Replace the persisted dataset with `rows`
    fn write(&self, rows: &[Sighting]) -> Result<()>;
}

/// JSON + CSV dataset store rooted at an output directory
pub struct JsonDatasetStore {
    output_dir: PathBuf,
    basename: String,
    write_csv: bool,
}

impl JsonDatasetStore {
    /// Create a store, creating `output_dir` if needed
    pub fn new(output_dir: impl AsRef<Path>, basename: impl Into<String>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        let basename = basename.into();
        if basename.is_empty() || basename.contains(['/', '\\']) {
            return Err(StoreError::invalid_path(format!(
                "dataset basename must be a plain file name, got {basename:?}"
            )));
        }
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            basename,
            write_csv: true,
        })
    }

    /// Skip the CSV projection
    pub fn without_csv(mut self) -> Self {
        self.write_csv = false;
        self
    }

    /// Path of the canonical JSON dataset
    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.json", self.basename))
    }

    /// Path of the CSV projection
    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.csv", self.basename))
    }

    /// All `<basename>*.json` files currently in the output directory, sorted
    pub fn prior_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self
            .output_dir
            .to_str()
            .ok_or_else(|| StoreError::invalid_path(self.output_dir.display().to_string()))?;
        let pattern = format!(
            "{}/{}*.json",
            glob::Pattern::escape(dir),
            glob::Pattern::escape(&self.basename)
        );

        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            files.push(entry?);
        }
        files.sort();
        Ok(files)
    }

    fn write_csv_projection(&self, rows: &[Sighting]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.output_dir)?;
        {
            let mut writer = csv::Writer::from_writer(BufWriter::new(tmp.as_file_mut()));
            for row in rows {
                writer.serialize(SightingCsvRow::from(row))?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(self.csv_path())?;
        Ok(())
    }

    fn remove_obsolete(&self) -> Result<()> {
        let keep = self.json_path();
        for file in self.prior_files()? {
            if file == keep {
                continue;
            }
            log::debug!("Removing obsolete data file {}", file.display());
            std::fs::remove_file(&file)?;
        }
        Ok(())
    }
}

impl SightingStore for JsonDatasetStore {
    fn read_all(&self) -> Result<Vec<Sighting>> {
        let mut rows = Vec::new();
        for file in self.prior_files()? {
            log::debug!("Reading old data from {}", file.display());
            let mut batch: Vec<Sighting> = read_json(&file)?;
            rows.append(&mut batch);
        }
        log::info!("Loaded {} prior sightings", rows.len());
        Ok(rows)
    }

    fn write(&self, rows: &[Sighting]) -> Result<()> {
        let json_path = self.json_path();
        log::info!("Write {} sightings to {}", rows.len(), json_path.display());
        write_json_atomic(&json_path, rows)?;

        if self.write_csv {
            log::info!("Write csv data to {}", self.csv_path().display());
            self.write_csv_projection(rows)?;
        }

        self.remove_obsolete()
    }
}

/// Read a JSON document from `path`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write `value` as pretty JSON to `path` via a temp file and rename.
///
/// The destination is either the old content or the complete new content.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = parent_dir(path)?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

pub(crate) fn parent_dir(path: &Path) -> Result<&Path> {
    match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Ok(Path::new(".")),
        Some(dir) => Ok(dir),
        None => Err(StoreError::invalid_path(path.display().to_string())),
    }
}
