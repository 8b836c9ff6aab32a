//! Crash-safe file persistence
//!
//! Every durable artifact of a run (fragments, manifest, checkpoints, the
//! combined output) goes through [`write_atomic`]: the bytes land in a uniquely
//! named temp file next to the target, are fsynced, and are then renamed over
//! the target. On POSIX the rename is atomic, so a reader sees either the old
//! file or the new one.
//!
//! The two halves are exposed separately ([`stage`] and [`StagedFile::commit`])
//! so tests can stop between them and observe what a crash would leave behind.

use crate::error::{CommonError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffix shared by all temp files so stale ones can be recognised
pub const TEMP_SUFFIX: &str = ".tmp";

/// A fully written, fsynced temp file that has not replaced its target yet
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    /// Atomically move the temp file over the target
    pub fn commit(self) -> Result<()> {
        std::fs::rename(&self.temp_path, &self.target)
            .map_err(|e| CommonError::io(&self.target, e))?;

        // Best effort: make the rename itself durable
        #[cfg(unix)]
        {
            if let Some(parent) = self.target.parent() {
                if let Ok(dir) = std::fs::File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }

        Ok(())
    }
}

/// Write `data` to a temp file beside `target` and fsync it
pub fn stage(target: &Path, data: &[u8]) -> Result<StagedFile> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let temp_path = target.with_file_name(format!(
        ".{}.{}{}",
        file_name,
        uuid::Uuid::new_v4(),
        TEMP_SUFFIX
    ));

    let mut file =
        std::fs::File::create(&temp_path).map_err(|e| CommonError::io(&temp_path, e))?;
    let written = file
        .write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| CommonError::io(&temp_path, e));

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(StagedFile {
        temp_path,
        target: target.to_path_buf(),
    })
}

/// Atomically replace `target` with `data`
pub fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
    stage(target, data)?.commit()
}

/// Serialize `value` as pretty JSON and atomically replace `target`
pub fn write_json_atomic<T: Serialize + ?Sized>(target: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(target, &bytes)
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| CommonError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| CommonError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

/// Create a directory and its parents
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| CommonError::io(path, e))
}

/// Remove temp files left behind by interrupted writes in `dir`
///
/// Returns the number of files removed.
pub fn sweep_stale_temp_files(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CommonError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
            if std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }

    Ok(removed)
}
