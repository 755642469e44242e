//! Language-model capability: text in, text out.
//!
//! Provides a `LanguageModel` trait with one HTTP implementation:
//! - **OpenAI-compatible chat completions** (`/chat/completions`), which also
//!   covers local gateways that speak the same protocol.
//!
//! The client makes exactly one request per call. Retries belong to the caller's
//! `RetryPolicy` so every stage backs off the same way.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::SummarizerConfig;

// ============================================================================
// LanguageModel trait
// ============================================================================

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a single prompt and return the model's text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Missing API key")]
    MissingApiKey,
}

impl LlmError {
    /// Failures that may clear up on their own (rate limits, timeouts, 5xx, transport).
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::Timeout | LlmError::RateLimited => true,
            LlmError::Api { code, .. } => *code >= 500,
            LlmError::Malformed(_) | LlmError::MissingApiKey => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Build from the `[summarizer]` section; the key is read from `api_key_env`.
    pub fn from_summarizer(config: &SummarizerConfig) -> Self {
        Self {
            api_key: std::env::var(&config.api_key_env).unwrap_or_default(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

// ============================================================================
// Chat completion API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

const SYSTEM_PROMPT: &str = "You are a job listing analyst. Follow the output format exactly.";

// ============================================================================
// OpenAiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: LlmConfig,
}

impl OpenAiChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// Create a client against a custom base URL (for testing / local gateways)
    pub fn with_base_url(mut config: LlmConfig, base_url: String) -> Result<Self, LlmError> {
        config.base_url = base_url.trim_end_matches('/').to_string();
        Self::new(config)
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.1,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { LlmError::Timeout } else { LlmError::Http(e) })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(model = %self.config.model, "Language model rate limited");
            return Err(LlmError::RateLimited);
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Language model API error");

            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::Malformed("no completion content".into()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete_once(prompt).await
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> LlmConfig {
        LlmConfig {
            api_key: api_key.to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "http://unused".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn test_complete_posts_chat_request_and_returns_content() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({ "model": "gpt-4o-mini" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  hello  ")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.complete("say hello").await;
        assert_eq!(result.expect("completion"), "hello");
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_transient_error() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let err = client.complete("x").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_carries_api_message() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": { "message": "overloaded" }
            })))
            .mount(&mock_server)
            .await;

        match client.complete("x").await {
            Err(e @ LlmError::Api { .. }) => {
                assert!(e.is_transient());
                assert!(e.to_string().contains("overloaded"));
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_request_is_not_transient() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .mount(&mock_server)
            .await;

        let err = client.complete("x").await.unwrap_err();
        assert!(matches!(err, LlmError::Api { code: 400, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&mock_server)
            .await;

        let err = client.complete("x").await.unwrap_err();
        assert!(matches!(err, LlmError::Malformed(_)));
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        match OpenAiChatClient::new(test_config("")) {
            Err(LlmError::MissingApiKey) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }
}
