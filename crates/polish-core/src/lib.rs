//! Polish Core
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Partitioned, checkpointed record enhancement.
//!
//! # Pipeline
//!
//! ```text
//! input.json ─► Partitioner ─► fragments/fragment_<id>.json
//!                                   │
//!                 ┌─────────────────┼─────────────────┐
//!                 ▼                 ▼                 ▼
//!         FragmentProcessor  FragmentProcessor  FragmentProcessor
//!                 │                 │                 │
//!                 ▼                 ▼                 ▼
//!          results/checkpoint_<id>.json (one writer each)
//!                 │                                   │
//!                 ▼                                   ▼
//!        ProgressAggregator (read-only)         Combiner ─► output.json
//! ```
//!
//! Each worker owns exactly one fragment. Checkpoints are replaced atomically
//! every `checkpoint_interval` records, so a worker killed at any point
//! resumes from its last flush without skipping or repeating records.
//!
//! # Example
//!
//! ```no_run
//! use polish_core::{
//!     CheckpointStore, Enhancer, FragmentId, FragmentProcessor, OllamaClient, Partitioner,
//!     PipelineConfig,
//! };
//!
//! # async fn run() -> polish_core::Result<()> {
//! let config = PipelineConfig::load(None)?;
//! let layout = config.layout();
//! let partitioner = Partitioner::new(layout.clone());
//! partitioner.prepare(config.input_path()?, config.workers)?;
//!
//! let client = OllamaClient::new(&config.endpoint, config.request_timeout())?;
//! let processor = FragmentProcessor::new(
//!     Enhancer::new(client).with_retry(config.retry_policy()),
//!     CheckpointStore::new(layout.results_dir()),
//!     config.processor_config(),
//! );
//! let fragment = partitioner.load_fragment(FragmentId::new(1))?;
//! processor.process(&fragment).await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod combine;
pub mod config;
pub mod document;
pub mod enhancer;
pub mod error;
pub mod inference;
pub mod layout;
pub mod manifest;
pub mod partition;
pub mod processor;
pub mod progress;
pub mod prompt;
pub mod record;
pub mod retry;

pub use checkpoint::{Checkpoint, CheckpointStore, Heartbeat};
pub use combine::{CombineMode, CombinedOutput, Combiner};
pub use config::{PipelineConfig, RetryConfig};
pub use document::{DocumentShape, InputDocument};
pub use enhancer::{Enhancer, GenerationSettings};
pub use error::{IncompleteFragment, InferenceError, PipelineError, Result};
pub use inference::{GenerationRequest, InferenceClient, OllamaClient};
pub use layout::WorkDir;
pub use manifest::{FragmentInfo, Manifest};
pub use partition::{fragment_sizes, partition, Partitioner};
pub use processor::{FragmentProcessor, ProcessSummary, ProcessorConfig};
pub use progress::{ProgressAggregator, ProgressSnapshot, WorkerState, WorkerStatus};
pub use prompt::PromptTemplate;
pub use record::{EnhancedRecord, FieldMapping, Fragment, FragmentId, Record, RecordOutcome};
pub use retry::{RetryOutcome, RetryPolicy};
