//! Text completion backends used for answers and chunk labels.
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledCompletion`] | none, always errors |
//! | `"openai"` | [`OpenAICompletion`] | `POST {url}/v1/chat/completions` |
//! | `"ollama"` | [`OllamaCompletion`] | `POST {url}/api/generate` |

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::CompletionConfig;
use crate::http;
use crate::retry::RetryPolicy;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Send one prompt and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Completion provider is disabled. Set [completion] provider in config.")
    }
}

/// OpenAI chat-completions API. Requires `OPENAI_API_KEY`.
pub struct OpenAICompletion {
    model: String,
    url: String,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            url,
            temperature: config.temperature,
            api_key,
            client: http::client(config.timeout_secs)?,
            policy: RetryPolicy::for_http(config.max_retries),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let json = http::post_json(
            &self.client,
            "OpenAI",
            &format!("{}/v1/chat/completions", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            &self.policy,
        )
        .await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Ollama `/api/generate`, non-streaming.
pub struct OllamaCompletion {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OllamaCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            url,
            temperature: config.temperature,
            client: http::client(config.timeout_secs)?,
            policy: RetryPolicy::for_http(config.max_retries),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl CompletionProvider for OllamaCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        let json = http::post_json(
            &self.client,
            "Ollama",
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            &self.policy,
        )
        .await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    create_completion_with_policy(config, RetryPolicy::for_http(config.max_retries))
}

/// Provider that sends exactly one HTTP request per call. Labeling retries
/// in its own loop, where the rate limiter admits every attempt.
pub fn create_labeling_completion(
    config: &CompletionConfig,
) -> Result<Arc<dyn CompletionProvider>> {
    create_completion_with_policy(config, RetryPolicy::for_http(0))
}

fn create_completion_with_policy(
    config: &CompletionConfig,
    policy: RetryPolicy,
) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?.with_policy(policy))),
        "ollama" => Ok(Arc::new(OllamaCompletion::new(config)?.with_policy(policy))),
        other => bail!("Unknown completion provider: {}", other),
    }
}
