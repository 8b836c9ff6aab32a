//! Read-only progress aggregation across fragments
//!
//! Worker status is derived from the latest readable checkpoint (durable
//! progress) and heartbeat (liveness) plus the fragment size from the
//! manifest. Polling never writes, so it is safe while workers run and after
//! they exit.

use crate::checkpoint::CheckpointStore;
use crate::manifest::Manifest;
use crate::record::FragmentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// No checkpoint yet
    Idle,
    Processing,
    Completed,
    /// No progress within the stall grace period
    Stalled,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Processing => "processing",
            WorkerState::Completed => "completed",
            WorkerState::Stalled => "stalled",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub fragment_id: FragmentId,
    pub state: WorkerState,
    /// Records durably checkpointed
    pub processed: usize,
    pub total: usize,
    pub error_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    pub fn percentage(&self) -> f64 {
        percentage(self.processed, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub taken_at: DateTime<Utc>,
    pub workers: BTreeMap<FragmentId, WorkerStatus>,
    pub processed: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    /// Overall completion in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }

    pub fn percentage(&self) -> f64 {
        percentage(self.processed, self.total)
    }

    pub fn is_complete(&self) -> bool {
        self.workers
            .values()
            .all(|w| w.state == WorkerState::Completed)
    }

    pub fn stalled(&self) -> impl Iterator<Item = &WorkerStatus> {
        self.workers
            .values()
            .filter(|w| w.state == WorkerState::Stalled)
    }

    pub fn error_count(&self) -> usize {
        self.workers.values().map(|w| w.error_count).sum()
    }
}

fn percentage(processed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        processed as f64 * 100.0 / total as f64
    }
}

pub struct ProgressAggregator {
    store: CheckpointStore,
    /// `(fragment id, fragment size)` in fragment order
    fragments: Vec<(FragmentId, usize)>,
    stall_grace: Duration,
}

impl ProgressAggregator {
    pub fn new(store: CheckpointStore, manifest: &Manifest, stall_grace: Duration) -> Self {
        Self {
            store,
            fragments: manifest
                .fragments
                .iter()
                .map(|f| (f.fragment_id, f.len))
                .collect(),
            stall_grace,
        }
    }

    pub fn poll(&self) -> ProgressSnapshot {
        self.poll_at(Utc::now())
    }

    /// Snapshot as seen at `now`
    pub fn poll_at(&self, now: DateTime<Utc>) -> ProgressSnapshot {
        let workers: BTreeMap<_, _> = self
            .fragments
            .iter()
            .map(|&(id, total)| (id, self.status_of(id, total, now)))
            .collect();

        ProgressSnapshot {
            taken_at: now,
            processed: workers.values().map(|w| w.processed).sum(),
            total: self.fragments.iter().map(|&(_, total)| total).sum(),
            workers,
        }
    }

    fn status_of(&self, id: FragmentId, total: usize, now: DateTime<Utc>) -> WorkerStatus {
        let checkpoint = match self.store.load(id) {
            Some(checkpoint) if checkpoint.total == total => checkpoint,
            _ => {
                return WorkerStatus {
                    fragment_id: id,
                    state: WorkerState::Idle,
                    processed: 0,
                    total,
                    error_count: 0,
                    last_update: None,
                }
            },
        };

        let heartbeat = self.store.heartbeat(id).map(|h| h.updated_at);
        let last_update = match heartbeat {
            Some(beat) if beat > checkpoint.updated_at => beat,
            _ => checkpoint.updated_at,
        };

        let state = if checkpoint.completed {
            WorkerState::Completed
        } else if is_stale(last_update, now, self.stall_grace) {
            WorkerState::Stalled
        } else {
            WorkerState::Processing
        };

        WorkerStatus {
            fragment_id: id,
            state,
            processed: checkpoint.processed,
            total,
            error_count: checkpoint.error_count,
            last_update: Some(last_update),
        }
    }
}

fn is_stale(last_update: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    match (now - last_update).to_std() {
        Ok(idle) => idle > grace,
        // last_update in the future (clock skew)
        Err(_) => false,
    }
}
