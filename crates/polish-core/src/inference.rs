//! Text-generation client
//!
//! The pipeline treats inference as a blocking request/response call behind
//! the [`InferenceClient`] trait. [`OllamaClient`] talks to an Ollama server's
//! `/api/chat` endpoint with streaming disabled.

use crate::error::InferenceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Default Ollama endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "gemma3:1b-it-qat";

/// One generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Generate text for `request`, returning the trimmed response
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError>;
}

#[async_trait]
impl<T: InferenceClient + ?Sized> InferenceClient for std::sync::Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError> {
        (**self).generate(request).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
}

impl OllamaClient {
    /// Create a client; `timeout` bounds every HTTP request
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InferenceError> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();

        Ok(Self { client, endpoint })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferenceError> {
        let body = ChatRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            stream: false,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self.client.post(self.chat_url()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        trace!(bytes = text.len(), "Received chat response");

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| InferenceError::Malformed(format!("invalid JSON: {}", e)))?;

        let content = parsed
            .message
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(InferenceError::Malformed(
                "response has no message content".to_string(),
            ));
        }
        Ok(content)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: DEFAULT_MODEL.to_string(),
            prompt: "Improve: bad copy".to_string(),
            temperature: 0.2,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn test_generate_sends_chat_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "gemma3:1b-it-qat",
                "stream": false,
                "messages": [{"role": "user", "content": "Improve: bad copy"}],
                "options": {"num_predict": 256}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gemma3:1b-it-qat",
                "message": {"role": "assistant", "content": "  Unbounded copy.\n"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
        let text = client.generate(&request()).await.unwrap();

        assert_eq!(text, "Unbounded copy.");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.generate(&request()).await.unwrap_err();

        assert_eq!(
            err,
            InferenceError::Status {
                status: 500,
                body: "model not loaded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_content_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": {"role": "assistant", "content": "   "}})),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.generate(&request()).await.unwrap_err();

        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.generate(&request()).await.unwrap_err();

        assert!(matches!(err, InferenceError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": {"content": "late"}}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri(), Duration::from_millis(200)).unwrap();
        let err = client.generate(&request()).await.unwrap_err();

        assert!(matches!(err, InferenceError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let client =
            OllamaClient::new(format!("http://127.0.0.1:{}", port), Duration::from_secs(2)).unwrap();
        let err = client.generate(&request()).await.unwrap_err();

        assert!(matches!(err, InferenceError::Connection(_)));
    }
}
