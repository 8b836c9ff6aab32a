//! `polish partition` command implementation
//!
//! Splits the input into one fragment file per worker.

use crate::error::Result;
use colored::Colorize;
use polish_core::{Manifest, Partitioner, PipelineConfig};

/// Partition the configured input
pub fn run(config: &PipelineConfig) -> Result<Manifest> {
    let layout = config.layout();
    let manifest = Partitioner::new(layout.clone()).prepare(config.input_path()?, config.workers)?;

    println!(
        "{} {} records ({}) into {} fragments",
        "Partitioned".green().bold(),
        manifest.total_records,
        manifest.shape.describe(),
        manifest.worker_count()
    );
    for info in &manifest.fragments {
        println!(
            "  fragment {:>3}: records {}..{} ({})",
            info.fragment_id,
            info.start_index,
            info.start_index + info.len,
            info.len
        );
    }
    println!("  Work dir: {}", layout.root().display());

    Ok(manifest)
}
