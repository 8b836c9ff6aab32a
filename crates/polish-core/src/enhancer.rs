//! Single-record enhancement: prompt, call, retry, mark

use crate::error::InferenceError;
use crate::inference::{GenerationRequest, InferenceClient};
use crate::prompt::PromptTemplate;
use crate::record::{EnhancedRecord, FieldMapping, Record};
use crate::retry::{RetryOutcome, RetryPolicy};
use std::time::Duration;
use tracing::{debug, error};

/// Model parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: crate::inference::DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            max_tokens: 256,
        }
    }
}

/// Turns a record into an enhanced or error-marked record
///
/// Never fails: once retries are exhausted the original payload is kept and
/// tagged with the last error.
pub struct Enhancer<C> {
    client: C,
    template: PromptTemplate,
    settings: GenerationSettings,
    retry: RetryPolicy,
    request_timeout: Duration,
    fields: FieldMapping,
}

impl<C: InferenceClient> Enhancer<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            template: PromptTemplate::default(),
            settings: GenerationSettings::default(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
            fields: FieldMapping::default(),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_fields(mut self, fields: FieldMapping) -> Self {
        self.fields = fields;
        self
    }

    pub fn fields(&self) -> &FieldMapping {
        &self.fields
    }

    /// Build the generation request for a record
    pub fn request_for(&self, record: &Record) -> GenerationRequest {
        let prompt = self.template.render(
            self.fields.context_text(&record.payload),
            self.fields.target_text(&record.payload),
        );
        GenerationRequest {
            model: self.settings.model.clone(),
            prompt,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    pub async fn enhance(&self, record: &Record) -> EnhancedRecord {
        let request = self.request_for(record);

        let outcome = self
            .retry
            .run(|_attempt| self.generate_bounded(&request))
            .await;

        match outcome {
            RetryOutcome::Success(text) => {
                debug!(original_index = record.original_index, "Enhanced record");
                self.fields.enhanced(record, text)
            },
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                error!(
                    original_index = record.original_index,
                    attempts,
                    error = %last_error,
                    "Enhancement failed, keeping original"
                );
                self.fields.failed(record, last_error.to_string())
            },
        }
    }

    async fn generate_bounded(&self, request: &GenerationRequest) -> Result<String, InferenceError> {
        match tokio::time::timeout(self.request_timeout, self.client.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(format!(
                "no response within {}s",
                self.request_timeout.as_secs_f32()
            ))),
        }
    }
}
