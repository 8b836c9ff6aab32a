//! `polish run` command implementation
//!
//! Partitions the input, runs one task per fragment in this process,
//! then combines. Fragments resume from their checkpoints on re-run.

use super::{build_processor, combine};
use crate::error::{CliError, Result};
use crate::progress::ProgressBoard;
use colored::Colorize;
use polish_core::{
    CheckpointStore, CombineMode, FragmentId, Partitioner, PipelineConfig, PipelineError,
    ProcessSummary, ProgressAggregator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

type WorkerResult = (FragmentId, std::result::Result<ProcessSummary, PipelineError>);

/// Run the whole pipeline and return the output path
pub async fn run(config: &PipelineConfig) -> Result<PathBuf> {
    let layout = config.layout();
    let partitioner = Partitioner::new(layout.clone());
    let manifest = partitioner.prepare(config.input_path()?, config.workers)?;
    let processor = Arc::new(build_processor(config)?);

    info!(
        workers = manifest.worker_count(),
        records = manifest.total_records,
        model = %config.model,
        "Starting pipeline"
    );

    let mut workers: JoinSet<WorkerResult> = JoinSet::new();
    for id in manifest.fragment_ids() {
        let fragment = partitioner.load_fragment(id)?;
        let processor = Arc::clone(&processor);
        workers.spawn(async move { (id, processor.process(&fragment).await) });
    }

    let aggregator = ProgressAggregator::new(
        CheckpointStore::new(layout.results_dir()),
        &manifest,
        config.stall_grace(),
    );
    let board = ProgressBoard::new(&aggregator.poll());
    let mut ticker = tokio::time::interval(config.poll_interval());
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let mut failure: Option<CliError> = None;
    let mut summaries = Vec::with_capacity(manifest.worker_count());

    loop {
        tokio::select! {
            joined = workers.join_next() => match joined {
                Some(Ok((_, Ok(summary)))) => {
                    board.update(&aggregator.poll());
                    summaries.push(summary);
                },
                Some(Ok((id, Err(e)))) => {
                    error!(fragment_id = %id, error = %e, "Worker failed");
                    failure.get_or_insert(CliError::WorkerFailed {
                        fragment_id: id,
                        message: e.to_string(),
                    });
                },
                Some(Err(join_error)) => {
                    error!(error = %join_error, "Worker task panicked");
                    failure.get_or_insert(CliError::Other(join_error.into()));
                },
                None => break,
            },
            _ = ticker.tick() => board.update(&aggregator.poll()),
            _ = &mut interrupt => {
                workers.abort_all();
                board.abandon();
                return Err(CliError::Interrupted);
            },
        }
    }

    if let Some(err) = failure {
        board.abandon();
        return Err(err);
    }
    board.update(&aggregator.poll());
    board.finish();

    let errors: usize = summaries.iter().map(|s| s.error_count).sum();
    info!(workers = summaries.len(), errors, "All workers complete");

    let (output, path) = combine::combine(config, &manifest, &partitioner, CombineMode::Full)?;
    println!(
        "{} {} fragments",
        "Processed".green().bold(),
        summaries.len()
    );
    combine::print_summary(&output, &path);

    Ok(path)
}
