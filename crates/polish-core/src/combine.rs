//! Merging fragment outputs into the final collection
//!
//! Fragments are concatenated in id order; because each fragment is a
//! contiguous slice of the input, that alone restores `original_index` order.
//! The result is still checked entry by entry before anything is written.

use crate::checkpoint::CheckpointStore;
use crate::error::{IncompleteFragment, PipelineError, Result};
use crate::manifest::Manifest;
use crate::partition::Partitioner;
use crate::record::{EnhancedRecord, FieldMapping, RecordOutcome};
use polish_common::fs;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// Every fragment must be complete
    Full,
    /// Unprocessed records are included, marked as pending
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinedOutput {
    pub records: Vec<EnhancedRecord>,
}

impl CombinedOutput {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn enhanced_count(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Enhanced))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Failed { .. }))
    }

    pub fn pending_count(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Pending))
    }

    fn count(&self, predicate: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.outcome)).count()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.records.iter().map(|r| r.payload.clone()).collect()
    }
}

pub struct Combiner<'a> {
    manifest: &'a Manifest,
    store: CheckpointStore,
    partitioner: &'a Partitioner,
    fields: FieldMapping,
}

impl<'a> Combiner<'a> {
    pub fn new(
        manifest: &'a Manifest,
        store: CheckpointStore,
        partitioner: &'a Partitioner,
        fields: FieldMapping,
    ) -> Self {
        Self {
            manifest,
            store,
            partitioner,
            fields,
        }
    }

    pub fn combine(&self, mode: CombineMode) -> Result<CombinedOutput> {
        let mut incomplete = Vec::new();
        let mut records = Vec::with_capacity(self.manifest.total_records);

        for info in &self.manifest.fragments {
            let checkpoint = self
                .store
                .load(info.fragment_id)
                .filter(|c| c.total == info.len && c.start_index == info.start_index);
            let processed = checkpoint.as_ref().map(|c| c.processed);

            if !checkpoint.as_ref().is_some_and(|c| c.completed) {
                incomplete.push(IncompleteFragment {
                    fragment_id: info.fragment_id,
                    processed,
                    total: info.len,
                });
            }

            match mode {
                CombineMode::Full => {
                    if let Some(checkpoint) = checkpoint.filter(|c| c.completed) {
                        records.extend(checkpoint.records);
                    }
                },
                CombineMode::Partial => {
                    let done = processed.unwrap_or(0);
                    if let Some(checkpoint) = checkpoint {
                        records.extend(checkpoint.records);
                    }
                    if done < info.len {
                        let fragment = self.partitioner.load_fragment(info.fragment_id)?;
                        records.extend(
                            fragment.records[done..]
                                .iter()
                                .map(|r| self.fields.pending(r)),
                        );
                    }
                },
            }
        }

        if mode == CombineMode::Full && !incomplete.is_empty() {
            return Err(PipelineError::Incomplete {
                total: self.manifest.worker_count(),
                fragments: incomplete,
            });
        }
        if !incomplete.is_empty() {
            warn!(
                incomplete = incomplete.len(),
                "Partial combine, unprocessed records are marked pending"
            );
        }

        let output = CombinedOutput { records };
        self.verify(&output)?;

        info!(
            records = output.len(),
            enhanced = output.enhanced_count(),
            failed = output.failed_count(),
            pending = output.pending_count(),
            "Combined fragments"
        );
        Ok(output)
    }

    /// Exactly one entry per `original_index`, ascending, no gaps
    fn verify(&self, output: &CombinedOutput) -> Result<()> {
        if output.len() != self.manifest.total_records {
            return Err(PipelineError::inconsistent(format!(
                "combined {} records, input has {}",
                output.len(),
                self.manifest.total_records
            )));
        }
        for (position, record) in output.records.iter().enumerate() {
            if record.original_index != position {
                return Err(PipelineError::inconsistent(format!(
                    "record at position {} has original index {}",
                    position, record.original_index
                )));
            }
        }
        Ok(())
    }

    /// Write the output atomically in the input's document shape
    pub fn write(&self, output: &CombinedOutput, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::ensure_dir(parent)?;
        }
        let document = self.manifest.shape.wrap(output.payloads());
        fs::write_json_atomic(path, &document)?;

        info!(path = %path.display(), records = output.len(), "Wrote combined output");
        Ok(())
    }
}
