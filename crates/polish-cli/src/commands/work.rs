//! `polish work` command implementation
//!
//! Runs one worker over its fragment. Ctrl-C drops the in-flight request;
//! the next invocation resumes from the last checkpoint.

use super::build_processor;
use crate::error::{CliError, Result};
use colored::Colorize;
use polish_core::{FragmentId, Partitioner, PipelineConfig, ProcessSummary};
use tracing::info;

/// Process fragment `fragment_id` to completion
pub async fn run(config: &PipelineConfig, fragment_id: u32) -> Result<ProcessSummary> {
    let id = FragmentId::new(fragment_id);
    let partitioner = Partitioner::new(config.layout());
    let manifest = partitioner.manifest()?;

    if manifest.fragment(id).is_none() {
        return Err(CliError::config(format!(
            "fragment {} does not exist; this work directory has fragments 1..={}",
            id,
            manifest.worker_count()
        )));
    }

    manifest.verify_input()?;
    let fragment = partitioner.load_fragment(id)?;
    let processor = build_processor(config)?;

    info!(
        fragment_id = %id,
        records = fragment.len(),
        model = %config.model,
        endpoint = %config.endpoint,
        resource_ceiling_mb = config.resource_ceiling_mb,
        "Worker starting"
    );

    let summary = tokio::select! {
        result = processor.process(&fragment) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!(fragment_id = %id, "Interrupted, abandoning in-flight request");
            return Err(CliError::Interrupted);
        }
    };

    println!(
        "{} fragment {}: {} records ({} this run, resumed at {}), {} errors",
        "Completed".green().bold(),
        summary.fragment_id,
        summary.total,
        summary.newly_processed,
        summary.resumed_from,
        summary.error_count
    );

    Ok(summary)
}
