//! `polish status` command implementation
//!
//! Shows per-worker state and overall completion from the checkpoints.

use crate::error::Result;
use crate::progress::{overall_line, render_table, watch};
use colored::Colorize;
use polish_core::{CheckpointStore, Partitioner, PipelineConfig, ProgressAggregator};

/// Show progress once, or keep polling with `watch`
pub async fn run(config: &PipelineConfig, watch_mode: bool, json: bool) -> Result<()> {
    let layout = config.layout();
    let manifest = Partitioner::new(layout.clone()).manifest()?;
    let aggregator = ProgressAggregator::new(
        CheckpointStore::new(layout.results_dir()),
        &manifest,
        config.stall_grace(),
    );

    if json {
        return print_json(&aggregator, config, watch_mode).await;
    }

    let snapshot = if watch_mode {
        tokio::select! {
            snapshot = watch(&aggregator, config.poll_interval()) => snapshot,
            _ = tokio::signal::ctrl_c() => aggregator.poll(),
        }
    } else {
        aggregator.poll()
    };

    println!("{}", render_table(&snapshot));
    println!("{}", overall_line(&snapshot));
    if snapshot.is_complete() {
        println!(
            "{}",
            "All fragments complete. Run 'polish combine' to write the output.".green()
        );
    }

    Ok(())
}

/// One JSON snapshot, or one JSON line per poll when watching
async fn print_json(
    aggregator: &ProgressAggregator,
    config: &PipelineConfig,
    watch_mode: bool,
) -> Result<()> {
    if !watch_mode {
        println!("{}", serde_json::to_string_pretty(&aggregator.poll())?);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = aggregator.poll();
                println!("{}", serde_json::to_string(&snapshot)?);
                if snapshot.is_complete() {
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
