//! Pre-flight partitioning of the input into per-worker fragments
//!
//! Records are split into `worker_count` contiguous fragments. The first
//! `total % worker_count` fragments get one extra record, so concatenating the
//! fragments in id order reproduces the input exactly.
//!
//! Fragment files are written before any worker starts and are never
//! overwritten once a partition has been committed, because checkpoints refer
//! to the records by position within their fragment.

use crate::checkpoint::CheckpointStore;
use crate::document::InputDocument;
use crate::error::{PipelineError, Result};
use crate::layout::WorkDir;
use crate::manifest::{FragmentInfo, Manifest, MANIFEST_FORMAT_VERSION};
use crate::record::{Fragment, FragmentId, Record};
use chrono::Utc;
use polish_common::{checksum, fs};
use std::path::Path;
use tracing::{debug, info, warn};

/// Fragment sizes for `total` records over `workers` fragments
pub fn fragment_sizes(total: usize, workers: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    let base = total / workers;
    let remainder = total % workers;
    (0..workers)
        .map(|position| if position < remainder { base + 1 } else { base })
        .collect()
}

/// Split records into contiguous near-equal fragments
pub fn partition(records: Vec<Record>, worker_count: usize) -> Result<Vec<Fragment>> {
    if worker_count == 0 {
        return Err(PipelineError::configuration("worker count must be at least 1"));
    }
    if records.is_empty() {
        return Err(PipelineError::configuration("input contains no records"));
    }

    let sizes = fragment_sizes(records.len(), worker_count);
    let mut remaining = records.into_iter();
    let mut start_index = 0;

    let fragments = sizes
        .into_iter()
        .enumerate()
        .map(|(position, size)| {
            let fragment = Fragment {
                fragment_id: FragmentId::from_position(position),
                start_index,
                records: remaining.by_ref().take(size).collect(),
            };
            start_index += size;
            fragment
        })
        .collect();

    Ok(fragments)
}

/// Writes and reads the fragment files of a work directory
pub struct Partitioner {
    work_dir: WorkDir,
}

impl Partitioner {
    pub fn new(work_dir: WorkDir) -> Self {
        Self { work_dir }
    }

    /// Partition `input` into `worker_count` fragment files
    ///
    /// An existing committed partition of the same input and worker count is
    /// returned untouched.
    pub fn prepare(&self, input: &Path, worker_count: usize) -> Result<Manifest> {
        if worker_count == 0 {
            return Err(PipelineError::configuration("worker count must be at least 1"));
        }
        if !input.is_file() {
            return Err(PipelineError::configuration(format!(
                "input file not found: {}",
                input.display()
            )));
        }

        let input_checksum = checksum::compute_file_checksum(input)?;

        if let Some(existing) = Manifest::load_if_exists(&self.work_dir.manifest_path())? {
            return self.reuse(existing, &input_checksum, worker_count);
        }

        let document = InputDocument::load(input)?;
        let total_records = document.records.len();
        let fragments = partition(document.records, worker_count)?;

        self.clear_interrupted_partition()?;
        fs::ensure_dir(&self.work_dir.fragments_dir())?;
        fs::ensure_dir(&self.work_dir.results_dir())?;

        for fragment in &fragments {
            let path = self.work_dir.fragment_path(fragment.fragment_id);
            fs::write_json_atomic(&path, fragment)?;
            debug!(
                fragment_id = %fragment.fragment_id,
                start_index = fragment.start_index,
                records = fragment.len(),
                "Wrote fragment"
            );
        }

        let manifest = Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            created_at: Utc::now(),
            input_path: input.to_path_buf(),
            input_checksum,
            shape: document.shape,
            total_records,
            fragments: fragments
                .iter()
                .map(|f| FragmentInfo {
                    fragment_id: f.fragment_id,
                    start_index: f.start_index,
                    len: f.len(),
                })
                .collect(),
        };
        manifest.save(&self.work_dir.manifest_path())?;

        let sizes: Vec<usize> = manifest.fragments.iter().map(|f| f.len).collect();
        info!(
            total_records,
            workers = worker_count,
            shape = %manifest.shape.describe(),
            ?sizes,
            "Partitioned input"
        );
        Ok(manifest)
    }

    /// Load one fragment written by `prepare`
    pub fn load_fragment(&self, id: FragmentId) -> Result<Fragment> {
        let path = self.work_dir.fragment_path(id);
        if !path.exists() {
            return Err(PipelineError::configuration(format!(
                "fragment {} not found at {} (run `polish partition` first)",
                id,
                path.display()
            )));
        }

        let fragment: Fragment = fs::read_json(&path)?;
        if fragment.fragment_id != id {
            return Err(PipelineError::inconsistent(format!(
                "{} holds fragment {}, expected {}",
                path.display(),
                fragment.fragment_id,
                id
            )));
        }
        Ok(fragment)
    }

    /// Load the committed manifest or fail with a hint to partition first
    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load_if_exists(&self.work_dir.manifest_path())?.ok_or_else(|| {
            PipelineError::configuration(format!(
                "no partition found in {} (run `polish partition` first)",
                self.work_dir.root().display()
            ))
        })
    }

    fn reuse(&self, existing: Manifest, input_checksum: &str, worker_count: usize) -> Result<Manifest> {
        if existing.worker_count() != worker_count {
            return Err(PipelineError::configuration(format!(
                "work directory {} is partitioned for {} workers, not {}",
                self.work_dir.root().display(),
                existing.worker_count(),
                worker_count
            )));
        }
        if existing.input_checksum != input_checksum {
            return Err(PipelineError::configuration(format!(
                "work directory {} was partitioned from a different input (checksum {})",
                self.work_dir.root().display(),
                existing.input_checksum
            )));
        }

        info!(
            total_records = existing.total_records,
            workers = worker_count,
            "Reusing existing partition"
        );
        Ok(existing)
    }

    /// Remove fragment files left by a partition that never wrote its manifest
    fn clear_interrupted_partition(&self) -> Result<()> {
        let dir = self.work_dir.fragments_dir();
        let stray = stray_fragment_files(&dir)?;
        if stray.is_empty() {
            return Ok(());
        }

        let store = CheckpointStore::new(self.work_dir.results_dir());
        if store.has_any()? {
            return Err(PipelineError::configuration(format!(
                "{} contains fragment files and checkpoints but no manifest; refusing to re-partition",
                dir.display()
            )));
        }

        warn!(files = stray.len(), "Rewriting fragments from an interrupted partition");
        for path in stray {
            std::fs::remove_file(&path).map_err(|source| PipelineError::Io { path, source })?;
        }
        fs::sweep_stale_temp_files(&dir)?;
        Ok(())
    }
}

fn stray_fragment_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PipelineError::Io {
                path: dir.to_path_buf(),
                source,
            })
        },
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PipelineError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("fragment_") && name.ends_with(".json") {
            files.push(entry.path());
        }
    }
    Ok(files)
}
