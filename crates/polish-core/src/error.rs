//! Error types for the enhancement pipeline

use crate::record::FragmentId;
use polish_common::CommonError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid worker count, missing input, unusable settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Full combine requested while some fragments are missing or short
    #[error("Cannot combine: {} of {total} fragments incomplete ({})", .fragments.len(), describe_incomplete(.fragments))]
    Incomplete {
        total: usize,
        fragments: Vec<IncompleteFragment>,
    },

    /// Stored artifacts contradict each other (indices out of order, sizes differ)
    #[error("Inconsistent pipeline state: {0}")]
    Inconsistent(String),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
}

impl PipelineError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an inconsistency error
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }
}

impl From<CommonError> for PipelineError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Io { path, source } => Self::Io { path, source },
            CommonError::Serialization(e) => Self::Serialization(e.to_string()),
            CommonError::InvalidJson { path, source } => {
                Self::Serialization(format!("{}: {}", path.display(), source))
            },
            CommonError::ChecksumMismatch { expected, actual } => Self::Configuration(format!(
                "input file changed since partitioning (expected checksum {}, got {})",
                expected, actual
            )),
        }
    }
}

impl From<::config::ConfigError> for PipelineError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// A fragment that blocks a full combine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteFragment {
    pub fragment_id: FragmentId,
    /// Records flushed so far, `None` when no checkpoint exists
    pub processed: Option<usize>,
    pub total: usize,
}

fn describe_incomplete(fragments: &[IncompleteFragment]) -> String {
    fragments
        .iter()
        .map(|f| match f.processed {
            Some(processed) => format!("fragment {}: {}/{}", f.fragment_id, processed, f.total),
            None => format!("fragment {}: no checkpoint", f.fragment_id),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure of a single inference call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Connection(err.to_string())
        }
    }
}
