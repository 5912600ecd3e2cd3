//! OpenAI-compatible chat completions provider.
//!
//! Works against api.openai.com or any server exposing the same
//! `/chat/completions` contract (set `base_url`).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::errors::LlmError;
use crate::llms::base_llm::{BaseLLM, CallOptions, ChatMessage, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions client with retry and exponential backoff.
pub struct OpenAICompletion {
    model: String,
    api_key: Option<String>,
    /// Environment variable the key was read from, for error messages.
    api_key_env: String,
    base_url: Option<String>,
    organization: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
    usage: Mutex<TokenUsage>,
}

impl fmt::Debug for OpenAICompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAICompletion")
            .field("model", &self.model)
            .field("base_url", &self.api_base_url())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl OpenAICompletion {
    /// Build a provider from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            api_key_env: config.api_key_env.clone(),
            base_url: config.base_url.clone(),
            organization: std::env::var("OPENAI_ORGANIZATION").ok(),
            max_retries: config.max_retries,
            client,
            usage: Mutex::new(TokenUsage::default()),
        })
    }

    /// Override the API key (mainly for tests and embedding).
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn api_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Request body for `/chat/completions`.
    pub fn build_request_body(&self, messages: &[ChatMessage], options: &CallOptions) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if options.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    /// Extract the assistant text from a chat completions response.
    fn parse_completions_response(&self, response: &Value) -> Result<String, LlmError> {
        let message = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| LlmError::Parse("no choices in response".into()))?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::Parse("choice has no text content".into()))?;

        if let Some(usage) = response.get("usage") {
            let prompt = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
            let completion = usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            log::debug!(
                "OpenAI token usage: prompt={}, completion={}",
                prompt,
                completion
            );
            let mut total = self.usage.lock();
            total.prompt_tokens += prompt;
            total.completion_tokens += completion;
            total.total_tokens += prompt + completion;
        }
        self.usage.lock().successful_requests += 1;

        Ok(content.to_string())
    }
}

#[async_trait]
impl BaseLLM for OpenAICompletion {
    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "openai"
    }

    async fn acall(
        &self,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<String, LlmError> {
        log::debug!(
            "OpenAICompletion.acall: model={}, messages={}",
            self.model,
            messages.len()
        );

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::MissingApiKey(self.api_key_env.clone()))?;

        let body = self.build_request_body(messages, options);
        let endpoint = format!("{}/chat/completions", self.api_base_url());

        let mut last_error = String::new();
        let mut retry_delay = Duration::from_secs(1);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!("OpenAI API retry attempt {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let mut request = self
                .client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", api_key));
            if let Some(ref org) = self.organization {
                request = request.header("OpenAI-Organization", org);
            }

            let response = match request.json(&body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = "rate limited (429)".to_string();
                continue;
            }
            if status.is_server_error() {
                last_error = format!("server error: {}", status);
                continue;
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            if status.is_client_error() {
                return Err(LlmError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let json: Value = serde_json::from_str(&text).map_err(|e| {
                let preview: String = text.chars().take(500).collect();
                LlmError::Parse(format!("{} - body: {}", e, preview))
            })?;
            return self.parse_completions_response(&json);
        }

        Err(LlmError::Exhausted(last_error))
    }

    fn token_usage(&self) -> TokenUsage {
        *self.usage.lock()
    }
}
