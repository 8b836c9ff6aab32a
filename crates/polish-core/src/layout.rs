//! On-disk layout of a pipeline work directory
//!
//! ```text
//! <work_dir>/
//!   fragments/manifest.json
//!   fragments/fragment_<id>.json
//!   results/checkpoint_<id>.json
//!   logs/
//! ```

use crate::record::FragmentId;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fragments_dir(&self) -> PathBuf {
        self.root.join("fragments")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.fragments_dir().join("manifest.json")
    }

    pub fn fragment_path(&self, id: FragmentId) -> PathBuf {
        self.fragments_dir().join(format!("fragment_{}.json", id))
    }

    pub fn checkpoint_path(&self, id: FragmentId) -> PathBuf {
        self.results_dir().join(format!("checkpoint_{}.json", id))
    }
}
