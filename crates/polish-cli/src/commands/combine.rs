//! `polish combine` command implementation
//!
//! Merges fragment outputs in input order and writes the final document.

use crate::error::Result;
use colored::Colorize;
use polish_core::{
    CheckpointStore, CombineMode, CombinedOutput, Combiner, Manifest, Partitioner, PipelineConfig,
};
use std::path::PathBuf;

/// Combine all fragments; `partial` includes unfinished records as pending
pub fn run(config: &PipelineConfig, partial: bool) -> Result<PathBuf> {
    let partitioner = Partitioner::new(config.layout());
    let manifest = partitioner.manifest()?;
    manifest.verify_input()?;
    let mode = if partial {
        CombineMode::Partial
    } else {
        CombineMode::Full
    };

    let (output, path) = combine(config, &manifest, &partitioner, mode)?;
    print_summary(&output, &path);
    Ok(path)
}

pub(crate) fn combine(
    config: &PipelineConfig,
    manifest: &Manifest,
    partitioner: &Partitioner,
    mode: CombineMode,
) -> Result<(CombinedOutput, PathBuf)> {
    let path = output_path(config, manifest)?;
    let combiner = Combiner::new(
        manifest,
        CheckpointStore::new(config.layout().results_dir()),
        partitioner,
        config.fields(),
    );

    let output = combiner.combine(mode)?;
    combiner.write(&output, &path)?;
    Ok((output, path))
}

/// Configured output, else derived from the input recorded at partition time
fn output_path(config: &PipelineConfig, manifest: &Manifest) -> Result<PathBuf> {
    if config.output.is_some() || config.input.is_some() {
        return Ok(config.output_path()?);
    }
    let mut from_manifest = config.clone();
    from_manifest.input = Some(manifest.input_path.clone());
    Ok(from_manifest.output_path()?)
}

pub(crate) fn print_summary(output: &CombinedOutput, path: &std::path::Path) {
    println!(
        "{} {} records to {}",
        "Wrote".green().bold(),
        output.len(),
        path.display()
    );
    println!(
        "  enhanced: {}, failed: {}, pending: {}",
        output.enhanced_count(),
        output.failed_count(),
        output.pending_count()
    );
    if output.failed_count() > 0 {
        println!(
            "  {}",
            "Failed records keep their original text and carry an error field.".yellow()
        );
    }
}
