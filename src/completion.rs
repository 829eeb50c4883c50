//! Chat-completion provider capability.
//!
//! The classifier and the Q&A surface both talk to a language model
//! through [`CompletionProvider`]. Two implementations ship:
//!
//! - [`DisabledCompletion`]: always errors; callers fall back to their
//!   deterministic paths. This is the default so the pipeline runs
//!   end-to-end with no credentials.
//! - [`OpenAiCompletion`]: chat-completions over HTTP with a per-request
//!   timeout and exponential backoff on transient failures.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::error::PipelineError;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run a single-turn completion for `prompt` with an optional system
    /// instruction. Returns the model's text response.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, PipelineError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// No-op provider used when no model is configured.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, PipelineError> {
        Err(PipelineError::Completion(
            "completion provider is disabled".to_string(),
        ))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

pub struct OpenAiCompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiCompletion {
    pub fn new(config: &ClassifierConfig, api_key: String) -> Result<Self, PipelineError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| PipelineError::Completion("openai provider requires a model".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Completion(format!("http client init failed: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            max_retries: config.max_retries,
        })
    }

    async fn request_once(&self, system: &str, prompt: &str) -> Result<String, RequestFailure> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestFailure::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RequestFailure::Transient(format!(
                "completion API returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RequestFailure::Fatal(format!(
                "completion API returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure::Fatal(format!("malformed completion response: {}", e)))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(text)
    }
}

enum RequestFailure {
    /// Retry with backoff: rate limit, server error, network failure.
    Transient(String),
    /// Do not retry: auth failure, bad request, unparseable body.
    Fatal(String),
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, PipelineError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(2u64.pow((attempt - 1).min(5)));
                debug!(attempt, ?backoff, "retrying completion request");
                tokio::time::sleep(backoff).await;
            }
            match self.request_once(system, prompt).await {
                Ok(text) => return Ok(text),
                Err(RequestFailure::Fatal(msg)) => {
                    return Err(PipelineError::Completion(msg));
                }
                Err(RequestFailure::Transient(msg)) => {
                    warn!(attempt, error = %msg, "transient completion failure");
                    last_error = msg;
                }
            }
        }
        Err(PipelineError::Completion(format!(
            "completion failed after {} retries: {}",
            self.max_retries, last_error
        )))
    }
}

/// Construct the provider named by the configuration. The API key is read
/// from `OPENAI_API_KEY`; a missing key degrades to the disabled provider
/// rather than failing the whole pipeline.
pub fn provider_from_config(
    config: &ClassifierConfig,
) -> Result<Box<dyn CompletionProvider>, PipelineError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletion)),
        "openai" => match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(Box::new(OpenAiCompletion::new(config, key)?)),
            _ => {
                warn!("OPENAI_API_KEY not set, completions disabled");
                Ok(Box::new(DisabledCompletion))
            }
        },
        other => Err(PipelineError::Completion(format!(
            "unknown completion provider '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_provider_errors() {
        let provider = DisabledCompletion;
        assert!(!provider.is_enabled());
        let err = provider.complete("sys", "hello").await.unwrap_err();
        assert_eq!(err.kind(), "completion");
    }

    #[test]
    fn disabled_config_builds_disabled_provider() {
        let config = ClassifierConfig::default();
        let provider = provider_from_config(&config).unwrap();
        assert!(!provider.is_enabled());
    }
}
