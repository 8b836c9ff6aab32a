//! Polish CLI Library
//!
//! Command-line interface for the partitioned record enhancement pipeline.
//!
//! # Overview
//!
//! - **Partitioning**: split the input into one fragment per worker (`polish partition`)
//! - **Workers**: enhance one fragment with checkpointing (`polish work --fragment N`)
//! - **Progress**: per-worker and overall completion (`polish status [--watch]`)
//! - **Combining**: merge fragment outputs in input order (`polish combine [--partial]`)
//! - **All-in-one**: partition, run every worker in-process, combine (`polish run`)
//!
//! Every command can be interrupted and re-run; work resumes from the last
//! checkpoint of each fragment.

pub mod commands;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};
use polish_core::PipelineConfig;
use std::path::PathBuf;

/// Polish - checkpointed LLM enhancement of record collections
#[derive(Parser, Debug)]
#[command(name = "polish")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (defaults to ./polish.toml when present)
    #[arg(short, long, env = "POLISH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Work directory holding fragments, checkpoints and logs
    #[arg(short, long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the full command reference as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split the input into one fragment per worker
    Partition {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Enhance one fragment, resuming from its checkpoint
    Work {
        /// Fragment to process (1-based)
        #[arg(short, long, env = "WORKER_ID")]
        fragment: u32,

        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        inference: InferenceArgs,
    },

    /// Show per-worker and overall progress
    Status {
        /// Keep polling until every worker completes
        #[arg(long)]
        watch: bool,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge fragment outputs into the final document
    Combine {
        /// Include unfinished records, marked as pending
        #[arg(long)]
        partial: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Partition, process every fragment in-process, then combine
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        inference: InferenceArgs,
    },
}

/// Dataset and partitioning overrides
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// Input JSON document
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Combined output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of workers / fragments
    #[arg(long)]
    pub workers: Option<usize>,

    /// Records between checkpoint flushes
    #[arg(long)]
    pub checkpoint_interval: Option<usize>,
}

/// Inference service overrides
#[derive(Args, Debug, Clone, Default)]
pub struct InferenceArgs {
    /// Inference service base URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Model identifier
    #[arg(short, long)]
    pub model: Option<String>,

    /// Pause between requests in milliseconds
    #[arg(long)]
    pub request_delay_ms: Option<u64>,
}

impl PipelineArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(input) = &self.input {
            config.input = Some(input.clone());
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(interval) = self.checkpoint_interval {
            config.checkpoint_interval = interval;
        }
    }
}

impl InferenceArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(delay) = self.request_delay_ms {
            config.request_delay_ms = delay;
        }
    }
}

impl Cli {
    /// Load the pipeline config and apply this invocation's flags
    pub fn resolve_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())?;

        if let Some(work_dir) = &self.work_dir {
            config.work_dir = work_dir.clone();
        }

        match &self.command {
            Some(Commands::Partition { pipeline }) | Some(Commands::Combine { pipeline, .. }) => {
                pipeline.apply(&mut config)
            },
            Some(Commands::Work {
                pipeline, inference, ..
            })
            | Some(Commands::Run {
                pipeline,
                inference,
            }) => {
                pipeline.apply(&mut config);
                inference.apply(&mut config);
            },
            Some(Commands::Status { .. }) | None => {},
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_work_parses_fragment() {
        let cli = Cli::try_parse_from(["polish", "work", "--fragment", "3", "--model", "llama3"]).unwrap();

        match cli.command {
            Some(Commands::Work {
                fragment,
                inference,
                ..
            }) => {
                assert_eq!(fragment, 3);
                assert_eq!(inference.model.as_deref(), Some("llama3"));
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = PipelineConfig::default();
        let args = PipelineArgs {
            workers: Some(8),
            checkpoint_interval: Some(10),
            ..Default::default()
        };

        args.apply(&mut config);

        assert_eq!(config.workers, 8);
        assert_eq!(config.checkpoint_interval, 10);
        assert_eq!(config.model, "gemma3:1b-it-qat");
    }
}
