//! Error types for the polish CLI
//!
//! Every variant carries a message that tells the user what to do next.

use polish_core::{FragmentId, PipelineError};
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Main error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check polish.toml, POLISH_* environment variables and command-line flags.")]
    Config(String),

    /// Full combine attempted before every fragment finished
    #[error("{0}. Run 'polish status' to check progress, or 'polish combine --partial' to write what is done.")]
    Incomplete(String),

    /// One or more workers of `polish run` failed
    #[error("Worker for fragment {fragment_id} failed: {message}. Run the same command again to resume from its last checkpoint.")]
    WorkerFailed {
        fragment_id: FragmentId,
        message: String,
    },

    /// Interrupted by the user (Ctrl-C)
    #[error("Interrupted. Progress up to the last checkpoint is saved; run the same command again to resume.")]
    Interrupted,

    /// Any other pipeline failure
    #[error("{0}")]
    Pipeline(PipelineError),

    /// JSON output failed
    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Interrupted => 130,
            CliError::Config(_) => 2,
            _ => 1,
        }
    }
}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Configuration(msg) => Self::Config(msg),
            incomplete @ PipelineError::Incomplete { .. } => Self::Incomplete(incomplete.to_string()),
            other => Self::Pipeline(other),
        }
    }
}

impl From<polish_core::InferenceError> for CliError {
    fn from(err: polish_core::InferenceError) -> Self {
        Self::Pipeline(PipelineError::from(err))
    }
}
