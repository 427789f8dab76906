//! Append-only CSV log of passages whose embedding failed.
//!
//! Columns are `filename, datetime, error_message`. Every filename present in
//! the log is skipped by later ingestion runs until the row is removed by hand.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use lode_core::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    #[serde(rename = "filename")]
    pub key: String,
    #[serde(rename = "datetime")]
    pub timestamp: DateTime<Utc>,
    pub error_message: String,
}

#[derive(Deserialize)]
struct LogRow {
    filename: Option<String>,
}

#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    skipped: HashSet<String>,
}

impl ErrorLog {
    /// Open the log at `path`, collecting the set of permanently skipped keys.
    ///
    /// A missing log is empty. An unreadable or malformed log is also treated
    /// as empty, with a warning, so that ingestion can proceed.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let skipped = match read_keys(&path) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Error log unreadable; previously recorded skips are ignored for this run"
                );
                HashSet::new()
            }
        };
        Self { path, skipped }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.skipped.contains(key)
    }

    pub fn len(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Append a failure row for `key`, writing the header if the file is new.
    ///
    /// The key is skipped for the rest of this run even if the append fails.
    pub fn record(&mut self, key: &str, message: &str) -> Result<ErrorLogEntry> {
        self.skipped.insert(key.to_string());

        let entry = ErrorLogEntry {
            key: key.to_string(),
            timestamp: Utc::now(),
            error_message: message.to_string(),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let write_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(&entry)?;
        writer.flush()?;
        Ok(entry)
    }
}

fn read_keys(path: &Path) -> Result<HashSet<String>> {
    let mut keys = HashSet::new();
    if !path.exists() {
        return Ok(keys);
    }
    let mut reader = csv::Reader::from_path(path)?;
    for row in reader.deserialize::<LogRow>() {
        if let Some(filename) = row?.filename.filter(|f| !f.is_empty()) {
            keys.insert(filename);
        }
    }
    Ok(keys)
}
