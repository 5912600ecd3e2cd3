//! Base trait for reasoning backends.
//!
//! Every phase that needs a language model (intent analysis, crew synthesis,
//! built-in prompt tools, tool-less task execution) talks to it through
//! [`BaseLLM`]. Providers own transport, authentication and retry; callers
//! only see text in, text out.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::LlmError;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A single message in a conversation (`{role, content}`).
///
/// Also used for the optional conversation history passed to crew
/// generation and refinement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

// ---------------------------------------------------------------------------
// Call options
// ---------------------------------------------------------------------------

/// Per-call generation parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    /// Sampling temperature; provider default when `None`.
    pub temperature: Option<f64>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl CallOptions {
    pub fn json(temperature: Option<f64>) -> Self {
        Self {
            temperature,
            json_mode: true,
        }
    }
}

/// Aggregate token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub successful_requests: u64,
}

// ---------------------------------------------------------------------------
// BaseLLM trait
// ---------------------------------------------------------------------------

/// Abstract reasoning backend.
///
/// Implementations handle their own error cases (timeouts, authentication,
/// malformed responses) and surface them as [`LlmError`].
#[async_trait]
pub trait BaseLLM: Send + Sync + fmt::Debug {
    /// Model identifier.
    fn model(&self) -> &str;

    /// Provider name, used in logs.
    fn provider(&self) -> &str {
        "openai"
    }

    /// Send `messages` and return the assistant's text.
    async fn acall(&self, messages: &[ChatMessage], options: &CallOptions)
        -> Result<String, LlmError>;

    /// Token usage accumulated since construction.
    fn token_usage(&self) -> TokenUsage {
        TokenUsage::default()
    }
}
