//! CLI command implementations

pub mod combine;
pub mod partition;
pub mod run;
pub mod status;
pub mod work;

use crate::error::Result;
use polish_core::{CheckpointStore, Enhancer, FragmentProcessor, OllamaClient, PipelineConfig};

/// Processor wired to the configured Ollama endpoint
pub(crate) fn build_processor(config: &PipelineConfig) -> Result<FragmentProcessor<OllamaClient>> {
    let client = OllamaClient::new(&config.endpoint, config.request_timeout())?;
    let enhancer = Enhancer::new(client)
        .with_template(config.prompt()?)
        .with_settings(config.generation_settings())
        .with_retry(config.retry_policy())
        .with_request_timeout(config.request_timeout())
        .with_fields(config.fields());

    Ok(FragmentProcessor::new(
        enhancer,
        CheckpointStore::new(config.layout().results_dir()),
        config.processor_config(),
    ))
}
