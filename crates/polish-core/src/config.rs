//! Pipeline configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file (`polish.toml` in the working directory, or an explicit path)
//! 3. `POLISH_*` environment variables; nested keys use `__`
//!    (e.g. `POLISH_RETRY__MAX_ATTEMPTS=5`)
//!
//! Command-line flags are applied on top by the CLI.

use crate::enhancer::GenerationSettings;
use crate::error::{PipelineError, Result};
use crate::inference::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::layout::WorkDir;
use crate::processor::ProcessorConfig;
use crate::prompt::PromptTemplate;
use crate::record::FieldMapping;
use crate::retry::RetryPolicy;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "POLISH";

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "polish";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of fragments / workers
    pub workers: usize,
    /// Records between checkpoint flushes
    pub checkpoint_interval: usize,
    pub work_dir: PathBuf,
    pub input: Option<PathBuf>,
    /// Defaults to `<input stem>.enhanced.json` next to the input
    pub output: Option<PathBuf>,
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub request_delay_ms: u64,
    /// Accelerator memory slice per worker; enforced externally, logged only
    pub resource_ceiling_mb: u64,
    pub stall_grace_secs: u64,
    pub poll_interval_secs: u64,
    pub target_field: String,
    pub context_field: String,
    pub error_field: String,
    pub pending_field: String,
    /// File holding a custom prompt template
    pub prompt_template: Option<PathBuf>,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: u32,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2000,
            multiplier: 2,
            max_backoff_ms: 30_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let fields = FieldMapping::default();
        Self {
            workers: 4,
            checkpoint_interval: 100,
            work_dir: PathBuf::from("./polish-work"),
            input: None,
            output: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: 0.2,
            max_tokens: 256,
            request_timeout_secs: 120,
            request_delay_ms: 100,
            resource_ceiling_mb: 2048,
            stall_grace_secs: 600,
            poll_interval_secs: 2,
            target_field: fields.target_field,
            context_field: fields.context_field,
            error_field: fields.error_field,
            pending_field: fields.pending_field,
            prompt_template: None,
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from defaults, the config file and the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, None)
    }

    /// Like [`load`](Self::load), reading environment variables from `env`
    /// instead of the process environment when given
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<::config::Map<String, String>>,
    ) -> Result<Self> {
        let file_source = match file {
            Some(path) => {
                if !path.is_file() {
                    return Err(PipelineError::configuration(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                File::from(path).required(true)
            },
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::configuration("workers must be at least 1"));
        }
        if self.checkpoint_interval == 0 {
            return Err(PipelineError::configuration(
                "checkpoint_interval must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::configuration(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.retry.multiplier == 0 {
            return Err(PipelineError::configuration("retry.multiplier must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(PipelineError::configuration(
                "request_timeout_secs must be at least 1",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(PipelineError::configuration(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.model.trim().is_empty() {
            return Err(PipelineError::configuration("model must not be empty"));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(PipelineError::configuration(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        let fields = [
            &self.target_field,
            &self.context_field,
            &self.error_field,
            &self.pending_field,
        ];
        if fields.iter().any(|f| f.is_empty()) {
            return Err(PipelineError::configuration("field names must not be empty"));
        }

        let worst_case = self.worst_case_record_time();
        if self.stall_grace() <= worst_case {
            warn!(
                stall_grace_secs = self.stall_grace_secs,
                worst_case_secs = worst_case.as_secs(),
                "stall_grace_secs is shorter than one record can legitimately take; \
                 healthy workers may be reported as stalled"
            );
        }
        Ok(())
    }

    /// Input path, required by commands that read the dataset
    pub fn input_path(&self) -> Result<&Path> {
        self.input.as_deref().ok_or_else(|| {
            PipelineError::configuration("no input file configured (set `input` or pass --input)")
        })
    }

    /// Configured output path, or one derived from the input name
    pub fn output_path(&self) -> Result<PathBuf> {
        if let Some(output) = &self.output {
            return Ok(output.clone());
        }
        let input = self.input_path()?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        Ok(input.with_file_name(format!("{}.enhanced.json", stem)))
    }

    pub fn layout(&self) -> WorkDir {
        WorkDir::new(&self.work_dir)
    }

    pub fn fields(&self) -> FieldMapping {
        FieldMapping {
            target_field: self.target_field.clone(),
            context_field: self.context_field.clone(),
            error_field: self.error_field.clone(),
            pending_field: self.pending_field.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            multiplier: self.retry.multiplier,
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            checkpoint_interval: self.checkpoint_interval,
            request_delay: Duration::from_millis(self.request_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Longest one record can take on a healthy worker: every attempt
    /// timing out, the backoff between attempts, then the request delay
    pub fn worst_case_record_time(&self) -> Duration {
        let policy = self.retry_policy();
        let attempts = self.retry.max_attempts.max(1);
        let backoff: Duration = (1..attempts).map(|n| policy.backoff_for(n)).sum();

        self.request_timeout()
            .saturating_mul(attempts)
            .saturating_add(backoff)
            .saturating_add(Duration::from_millis(self.request_delay_ms))
    }

    pub fn stall_grace(&self) -> Duration {
        Duration::from_secs(self.stall_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn prompt(&self) -> Result<PromptTemplate> {
        match &self.prompt_template {
            Some(path) => PromptTemplate::from_file(path),
            None => Ok(PromptTemplate::default()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Option<::config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();

        assert_eq!(config.workers, 4);
        assert_eq!(config.checkpoint_interval, 100);
        assert_eq!(config.model, "gemma3:1b-it-qat");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_stall_grace_outlasts_slowest_record() {
        let config = PipelineConfig::default();

        // 3 timed-out attempts of 120s, 2s + 4s backoff, 100ms delay
        assert_eq!(config.worst_case_record_time(), Duration::from_millis(366_100));
        assert!(config.stall_grace() > config.worst_case_record_time());
    }

    #[test]
    fn test_worst_case_record_time_follows_retry_settings() {
        let mut config = PipelineConfig::default();
        config.request_timeout_secs = 10;
        config.request_delay_ms = 0;
        config.retry.max_attempts = 4;
        config.retry.initial_backoff_ms = 1_000;
        config.retry.max_backoff_ms = 3_000;

        // 40s of attempts, backoff 1s + 2s + 3s (capped)
        assert_eq!(config.worst_case_record_time(), Duration::from_secs(46));
    }

    #[test]
    fn test_file_then_env_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("polish.toml");
        std::fs::write(
            &path,
            r#"
workers = 8
model = "llama3"
input = "data/vulns.json"

[retry]
max_attempts = 5
"#,
        )
        .unwrap();

        let config = PipelineConfig::load_with_env(
            Some(&path),
            env(&[("POLISH_WORKERS", "6"), ("POLISH_RETRY__INITIAL_BACKOFF_MS", "10")]),
        )
        .unwrap();

        assert_eq!(config.workers, 6);
        assert_eq!(config.model, "llama3");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 10);
        assert_eq!(config.checkpoint_interval, 100);
        assert_eq!(config.input, Some(PathBuf::from("data/vulns.json")));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = PipelineConfig::load_with_env(Some(Path::new("/no/such/polish.toml")), env(&[]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = PipelineConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_attempts() {
        let mut config = PipelineConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.checkpoint_interval = 10;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_path_derived_from_input() {
        let config = PipelineConfig {
            input: Some(PathBuf::from("/data/vulnerability_dataset.json")),
            ..Default::default()
        };

        assert_eq!(
            config.output_path().unwrap(),
            PathBuf::from("/data/vulnerability_dataset.enhanced.json")
        );
    }

    #[test]
    fn test_output_path_requires_input() {
        let err = PipelineConfig::default().output_path().unwrap_err();
        assert!(err.to_string().contains("no input file configured"));
    }

    #[test]
    fn test_conversions() {
        let config = PipelineConfig::default();

        assert_eq!(config.retry_policy().initial_backoff, Duration::from_secs(2));
        assert_eq!(config.processor_config().request_delay, Duration::from_millis(100));
        assert_eq!(config.fields(), FieldMapping::default());
        assert_eq!(config.layout().results_dir(), PathBuf::from("./polish-work/results"));
    }
}
