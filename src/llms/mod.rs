//! Reasoning backends.
//!
//! - [`base_llm`] - the [`BaseLLM`] trait and message types
//! - [`providers`] - network providers (OpenAI-compatible)
//! - [`scripted`] - offline provider replaying canned responses

pub mod base_llm;
pub mod providers;
pub mod scripted;

use std::sync::Arc;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::errors::LlmError;

pub use base_llm::{BaseLLM, CallOptions, ChatMessage, TokenUsage};
pub use providers::openai::OpenAICompletion;
pub use scripted::ScriptedLLM;

/// Construct the provider selected by `config.provider`.
pub fn build_llm(config: &LlmConfig) -> Result<Arc<dyn BaseLLM>, LlmError> {
    match config.provider {
        LlmProviderKind::Openai => Ok(Arc::new(OpenAICompletion::from_config(config)?)),
        LlmProviderKind::Scripted => {
            log::warn!("Using scripted LLM provider; responses are canned");
            Ok(Arc::new(ScriptedLLM::echo()))
        }
    }
}
