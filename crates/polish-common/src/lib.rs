//! Polish Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the Polish workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by the master and the workers
//! - **Files**: crash-safe JSON persistence (temp file + fsync + rename)
//! - **Checksums**: input fingerprints stored in the partition manifest
//!
//! # Example
//!
//! ```no_run
//! use polish_common::{fs, Result};
//! use serde_json::json;
//!
//! fn persist(path: &std::path::Path) -> Result<()> {
//!     fs::write_json_atomic(path, &json!({"processed": 100}))?;
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod fs;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
