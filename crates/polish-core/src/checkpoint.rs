//! Per-fragment checkpoints
//!
//! A checkpoint holds every record a worker has finished, in fragment order,
//! plus the offset it reached. Each fragment has exactly one checkpoint file
//! and exactly one writer; saves replace the file atomically so a reader sees
//! either the previous or the new snapshot.
//!
//! Unreadable checkpoints are treated as absent: the fragment restarts from
//! offset 0, which loses at most the records since the last good flush.

use crate::error::Result;
use crate::record::{EnhancedRecord, Fragment, FragmentId};
use chrono::{DateTime, Utc};
use polish_common::fs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub fragment_id: FragmentId,
    /// `original_index` of the fragment's first record
    pub start_index: usize,
    /// Records in the fragment
    pub total: usize,
    /// Records finished so far; always equals `records.len()`
    pub processed: usize,
    pub completed: bool,
    pub error_count: usize,
    pub updated_at: DateTime<Utc>,
    pub records: Vec<EnhancedRecord>,
}

impl Checkpoint {
    /// Empty checkpoint for a fragment that has not started
    pub fn new(fragment: &Fragment) -> Self {
        Self {
            fragment_id: fragment.fragment_id,
            start_index: fragment.start_index,
            total: fragment.len(),
            processed: 0,
            completed: fragment.is_empty(),
            error_count: 0,
            updated_at: Utc::now(),
            records: Vec::with_capacity(fragment.len()),
        }
    }

    /// Append the next finished record
    pub fn push(&mut self, record: EnhancedRecord) {
        if record.is_failed() {
            self.error_count += 1;
        }
        self.records.push(record);
        self.processed = self.records.len();
    }

    /// Mark the fragment finished once every record is in
    pub fn finish(&mut self) {
        self.completed = self.processed == self.total;
        self.updated_at = Utc::now();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }

    /// Internal invariants: counts agree and indices are contiguous
    pub fn is_consistent(&self) -> bool {
        self.processed == self.records.len()
            && self.processed <= self.total
            && (!self.completed || self.processed == self.total)
            && self.error_count == self.records.iter().filter(|r| r.is_failed()).count()
            && self
                .records
                .iter()
                .enumerate()
                .all(|(offset, r)| r.original_index == self.start_index + offset)
    }

    /// Whether this checkpoint was produced for `fragment`
    pub fn matches(&self, fragment: &Fragment) -> bool {
        self.fragment_id == fragment.fragment_id
            && self.start_index == fragment.start_index
            && self.total == fragment.len()
    }
}

/// Liveness marker rewritten after every record
///
/// Checkpoints only move every K records; the heartbeat lets observers tell a
/// slow worker from a dead one in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub fragment_id: FragmentId,
    pub processed: usize,
    pub updated_at: DateTime<Utc>,
}

/// Checkpoint files of one work directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, id: FragmentId) -> PathBuf {
        self.dir.join(format!("checkpoint_{}.json", id))
    }

    /// Latest readable checkpoint, `None` when missing or unusable
    pub fn load(&self, id: FragmentId) -> Option<Checkpoint> {
        let path = self.path(id);
        if !path.exists() {
            return None;
        }

        let checkpoint: Checkpoint = match fs::read_json(&path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(fragment_id = %id, path = %path.display(), error = %e, "Ignoring unreadable checkpoint");
                return None;
            },
        };

        if checkpoint.fragment_id != id {
            warn!(
                fragment_id = %id,
                found = %checkpoint.fragment_id,
                "Ignoring checkpoint written for another fragment"
            );
            return None;
        }
        if !checkpoint.is_consistent() {
            warn!(fragment_id = %id, "Ignoring inconsistent checkpoint");
            return None;
        }

        Some(checkpoint)
    }

    /// Atomically replace the fragment's checkpoint
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::ensure_dir(&self.dir)?;
        fs::write_json_atomic(&self.path(checkpoint.fragment_id), checkpoint)?;
        Ok(())
    }

    pub fn heartbeat_path(&self, id: FragmentId) -> PathBuf {
        self.dir.join(format!("heartbeat_{}.json", id))
    }

    pub fn beat(&self, id: FragmentId, processed: usize) -> Result<()> {
        let heartbeat = Heartbeat {
            fragment_id: id,
            processed,
            updated_at: Utc::now(),
        };
        fs::write_json_atomic(&self.heartbeat_path(id), &heartbeat)?;
        Ok(())
    }

    /// Latest heartbeat, `None` when missing or unreadable
    pub fn heartbeat(&self, id: FragmentId) -> Option<Heartbeat> {
        let path = self.heartbeat_path(id);
        if !path.exists() {
            return None;
        }
        fs::read_json::<Heartbeat>(&path)
            .ok()
            .filter(|h| h.fragment_id == id)
    }

    /// Whether any checkpoint file exists
    pub fn has_any(&self) -> Result<bool> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(crate::error::PipelineError::Io {
                    path: self.dir.clone(),
                    source,
                })
            },
        };

        Ok(entries.flatten().any(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("checkpoint_") && name.ends_with(".json")
        }))
    }
}
