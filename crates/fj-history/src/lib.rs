#![forbid(unsafe_code)]

//! A capacity-bounded, newest-first log of executed joins, persisted as one
//! JSON document after every change.
//!
//! Persistence is best effort: a missing or unreadable file loads as an
//! empty history and failed writes are logged, never returned.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fj_join::{JoinConfig, JoinResult, JoinType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// The slice of [`fj_join::JoinMetadata`] kept per history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    pub result_rows: usize,
    pub join_type: JoinType,
    pub join_keys: Vec<String>,
    pub matched_rows: usize,
    pub processing_time: f64,
    pub memory_usage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinHistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub left_dataset_name: String,
    pub right_dataset_name: String,
    pub config: JoinConfig,
    pub result_metadata: HistoryMetadata,
    pub success: bool,
    pub error_message: Option<String>,
}

impl JoinHistoryEntry {
    fn from_result(left_name: &str, right_name: &str, result: &JoinResult) -> Self {
        let metadata = result.metadata();
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            left_dataset_name: left_name.to_owned(),
            right_dataset_name: right_name.to_owned(),
            config: result.config().clone(),
            result_metadata: HistoryMetadata {
                result_rows: metadata.result_rows,
                join_type: metadata.join_type,
                join_keys: metadata.join_keys.clone(),
                matched_rows: metadata.matched_rows,
                processing_time: result.processing_time(),
                memory_usage: metadata.memory_usage_mb,
            },
            success: result.success(),
            error_message: result.error_message().map(str::to_owned),
        }
    }
}

/// Aggregate counts over the entries currently held.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub by_join_type: BTreeMap<String, usize>,
    /// Mean processing time of successful entries, 0 when there are none.
    pub average_processing_time: f64,
}

#[derive(Debug, Error)]
enum HistoryError {
    #[error("history file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("history file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct JoinHistory {
    path: PathBuf,
    capacity: usize,
    entries: Vec<JoinHistoryEntry>,
}

impl JoinHistory {
    /// Load the history at `path` with the default capacity.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_capacity(path, DEFAULT_HISTORY_CAPACITY)
    }

    /// Load the history at `path`, keeping at most `capacity` entries
    /// (at least one).
    #[must_use]
    pub fn open_with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let capacity = capacity.max(1);
        let mut entries = match load(&path) {
            Ok(entries) => entries,
            Err(HistoryError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no join history yet");
                Vec::new()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable join history");
                Vec::new()
            }
        };
        entries.truncate(capacity);
        Self {
            path,
            capacity,
            entries,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record `result` as the newest entry, evicting the oldest past capacity.
    pub fn add_entry(
        &mut self,
        left_name: &str,
        right_name: &str,
        result: &JoinResult,
    ) -> &JoinHistoryEntry {
        self.entries
            .insert(0, JoinHistoryEntry::from_result(left_name, right_name, result));
        self.entries.truncate(self.capacity);
        self.persist();
        &self.entries[0]
    }

    pub fn clear_history(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// Entries, newest first.
    #[must_use]
    pub fn entries(&self) -> &[JoinHistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get_entry(&self, id: Uuid) -> Option<&JoinHistoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Removes the entry with `id`; returns whether one was found.
    pub fn remove_entry(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn statistics(&self) -> HistoryStatistics {
        let mut stats = HistoryStatistics {
            total: self.entries.len(),
            ..HistoryStatistics::default()
        };
        let mut successful_time = 0.0;
        for entry in &self.entries {
            if entry.success {
                stats.successful += 1;
                successful_time += entry.result_metadata.processing_time;
            } else {
                stats.failed += 1;
            }
            *stats
                .by_join_type
                .entry(entry.config.join_type().as_str().to_owned())
                .or_default() += 1;
        }
        if stats.successful > 0 {
            stats.average_processing_time = successful_time / stats.successful as f64;
        }
        stats
    }

    fn persist(&self) {
        if let Err(err) = save(&self.path, &self.entries) {
            warn!(path = %self.path.display(), error = %err, "failed to persist join history");
        }
    }
}

fn load(path: &Path) -> Result<Vec<JoinHistoryEntry>, HistoryError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write through a sibling temp file and rename it over `path`.
fn save(path: &Path, entries: &[JoinHistoryEntry]) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, entries)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&tmp_path, path)?;
    Ok(())
}
