use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GenerationOptions {
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f64,
    pub(crate) timeout: Duration,
}

#[derive(Debug, Error)]
pub(crate) enum GenerationError {
    #[error("generative service credential is not configured (set LLM_API_KEY)")]
    Unconfigured,
    #[error("generative service request timed out after {0:?}")]
    Timeout(Duration),
    #[error("generative service request failed: {0}")]
    Transport(String),
    #[error("generative service returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("generative service reply carried no message content")]
    MissingContent,
}

/// Prompt in, free text out. No schema is enforced on the reply.
#[async_trait]
pub(crate) trait TextGenerator: Send + Sync {
    fn is_configured(&self) -> bool;

    fn model(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenerationError>;
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub(crate) struct ChatCompletionsClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatCompletionsClient {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.ai().request_timeout))
            .build()
            .context("Failed to build generative service HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().api_key.clone(),
            base_url: settings.ai().base_url.trim_end_matches('/').to_string(),
            model: settings.ai().model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, GenerationError> {
        if !self.is_configured() {
            return Err(GenerationError::Unconfigured);
        }

        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_completion_tokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let timer = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| transport_error(err, options.timeout))?;

        let status = response.status();
        let body: Value =
            response.json().await.map_err(|err| transport_error(err, options.timeout))?;

        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                detail: extract_error_message(&body),
            });
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or(GenerationError::MissingContent)?;

        let tokens_used = body
            .get("usage")
            .and_then(|usage| usage.get("total_tokens"))
            .and_then(Value::as_u64);

        tracing::debug!(
            model = %self.model,
            duration_seconds = timer.elapsed().as_secs_f64(),
            tokens_used = tokens_used,
            "Generative completion received"
        );

        Ok(content.to_string())
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::Transport(err.to_string())
    }
}

fn extract_error_message(payload: &Value) -> String {
    payload
        .get("error")
        .and_then(|error| error.get("message").and_then(Value::as_str).or_else(|| error.as_str()))
        .or_else(|| payload.get("detail").and_then(Value::as_str))
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .map(ToString::to_string)
        .unwrap_or_else(|| payload.to_string())
}
