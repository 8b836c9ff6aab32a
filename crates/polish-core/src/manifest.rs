//! Partition manifest
//!
//! Written last by the partitioner, the manifest is the commit point of a
//! partition: fragment files without a manifest belong to an interrupted
//! partition. It records the input fingerprint and document shape;
//! [`Manifest::verify_input`] lets later commands refuse an input that
//! changed since partitioning.

use crate::document::DocumentShape;
use crate::error::{PipelineError, Result};
use crate::record::FragmentId;
use chrono::{DateTime, Utc};
use polish_common::{checksum, fs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentInfo {
    pub fragment_id: FragmentId,
    pub start_index: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub input_path: PathBuf,
    /// SHA-256 of the input file at partition time
    pub input_checksum: String,
    pub shape: DocumentShape,
    pub total_records: usize,
    pub fragments: Vec<FragmentInfo>,
}

impl Manifest {
    pub fn worker_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&FragmentInfo> {
        self.fragments.iter().find(|f| f.fragment_id == id)
    }

    pub fn fragment_ids(&self) -> impl Iterator<Item = FragmentId> + '_ {
        self.fragments.iter().map(|f| f.fragment_id)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let manifest: Manifest = fs::read_json(path)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load the manifest, `None` when no partition has been committed yet
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write_json_atomic(path, self)?;
        Ok(())
    }

    /// Check the input file still matches the one that was partitioned
    ///
    /// A missing input is only warned about: fragments hold every record, so
    /// the run can still finish without it.
    pub fn verify_input(&self) -> Result<()> {
        if !self.input_path.is_file() {
            warn!(
                input = %self.input_path.display(),
                "Partitioned input no longer exists, skipping checksum check"
            );
            return Ok(());
        }
        checksum::verify_file_checksum(&self.input_path, &self.input_checksum)?;
        Ok(())
    }

    /// Fragments must be contiguous, 1-based and cover every record
    fn validate(&self) -> Result<()> {
        if self.format_version != MANIFEST_FORMAT_VERSION {
            return Err(PipelineError::inconsistent(format!(
                "unsupported manifest version {}",
                self.format_version
            )));
        }

        let mut next_index = 0;
        for (position, info) in self.fragments.iter().enumerate() {
            if info.fragment_id != FragmentId::from_position(position) {
                return Err(PipelineError::inconsistent(format!(
                    "manifest lists fragment {} at position {}",
                    info.fragment_id,
                    position + 1
                )));
            }
            if info.start_index != next_index {
                return Err(PipelineError::inconsistent(format!(
                    "fragment {} starts at {} but previous fragment ends at {}",
                    info.fragment_id, info.start_index, next_index
                )));
            }
            next_index += info.len;
        }

        if next_index != self.total_records {
            return Err(PipelineError::inconsistent(format!(
                "manifest fragments cover {} records, expected {}",
                next_index, self.total_records
            )));
        }
        Ok(())
    }
}
