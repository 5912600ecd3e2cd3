//! Intent Analyzer.
//!
//! Turns a free-text prompt into a structured [`Intent`]. Only an empty
//! prompt is an error; any failure of the reasoning call degrades to
//! [`Intent::fallback`] since the intent only informs tool ranking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::IntentConfig;
use crate::errors::ValidationError;
use crate::llms::{BaseLLM, CallOptions, ChatMessage};
use crate::planning::parser::parse_intent;
use crate::planning::prompts;
use crate::tools::GENERAL_CATEGORY;

/// Characters of the prompt kept as the fallback goal summary.
const FALLBACK_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub goal_summary: String,
    /// Capability categories, most important first.
    pub required_capabilities: Vec<String>,
    pub estimated_task_count: usize,
}

impl Intent {
    /// Conservative intent used when analysis fails.
    pub fn fallback(prompt: &str) -> Self {
        Self {
            goal_summary: truncate_chars(prompt, FALLBACK_SUMMARY_CHARS),
            required_capabilities: vec![GENERAL_CATEGORY.to_string()],
            estimated_task_count: 1,
        }
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

pub struct IntentAnalyzer {
    llm: Arc<dyn BaseLLM>,
    config: IntentConfig,
}

impl std::fmt::Debug for IntentAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentAnalyzer")
            .field("model", &self.llm.model())
            .field("config", &self.config)
            .finish()
    }
}

impl IntentAnalyzer {
    pub fn new(llm: Arc<dyn BaseLLM>, config: IntentConfig) -> Self {
        Self { llm, config }
    }

    /// Analyze `prompt` in the light of `history`.
    ///
    /// `categories` lists the capability categories the caller can satisfy;
    /// capabilities outside it are still kept, the selector simply finds no
    /// tool for them.
    pub async fn analyze(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        categories: &[String],
    ) -> Result<Intent, ValidationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ValidationError::new("prompt must not be empty"));
        }
        let prompt = self.clip(prompt);

        match self.call(&prompt, history, categories).await {
            Ok(intent) => {
                log::debug!(
                    "Intent: {:?} (~{} tasks)",
                    intent.required_capabilities,
                    intent.estimated_task_count
                );
                Ok(intent)
            }
            Err(reason) => {
                log::warn!("Intent analysis failed, using default intent: {}", reason);
                Ok(Intent::fallback(&prompt))
            }
        }
    }

    fn clip(&self, prompt: &str) -> String {
        let clipped = truncate_chars(prompt, self.config.max_prompt_chars);
        if clipped.len() < prompt.len() {
            log::info!(
                "Prompt truncated to {} characters",
                self.config.max_prompt_chars
            );
        }
        clipped
    }

    async fn call(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        categories: &[String],
    ) -> Result<Intent, String> {
        let system = prompts::intent_system(categories, self.config.max_estimated_tasks)?;
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(prompt));

        let reply = self
            .llm
            .acall(&messages, &CallOptions::json(Some(0.0)))
            .await
            .map_err(|e| e.to_string())?;
        let draft = parse_intent(&reply)?;

        let mut capabilities: Vec<String> = Vec::new();
        for cap in draft.required_capabilities {
            let cap = cap.trim().to_lowercase();
            if !cap.is_empty() && !capabilities.contains(&cap) {
                capabilities.push(cap);
            }
        }
        if capabilities.is_empty() {
            capabilities.push(GENERAL_CATEGORY.to_string());
        }

        let goal_summary = match draft.goal_summary.trim() {
            "" => truncate_chars(prompt, FALLBACK_SUMMARY_CHARS),
            summary => summary.to_string(),
        };
        let max = self.config.max_estimated_tasks.max(1);
        let estimated = draft
            .estimated_task_count
            .map(|n| (n as usize).clamp(1, max))
            .unwrap_or(capabilities.len().min(max));

        Ok(Intent {
            goal_summary,
            required_capabilities: capabilities,
            estimated_task_count: estimated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::ScriptedLLM;

    fn categories() -> Vec<String> {
        vec!["general".into(), "email".into(), "content".into()]
    }

    fn analyzer(llm: Arc<ScriptedLLM>) -> IntentAnalyzer {
        IntentAnalyzer::new(llm, IntentConfig::default())
    }

    #[tokio::test]
    async fn test_structured_intent() {
        let llm = Arc::new(ScriptedLLM::new(vec![r#"{"goalSummary": "Cold outreach",
            "requiredCapabilities": ["Email", " content ", "email"], "estimatedTaskCount": 40}"#
            .into()]));
        let intent = analyzer(llm.clone())
            .analyze("Write a cold email campaign", &[], &categories())
            .await
            .unwrap();
        assert_eq!(intent.goal_summary, "Cold outreach");
        assert_eq!(intent.required_capabilities, vec!["email", "content"]);
        assert_eq!(intent.estimated_task_count, 12);
        assert!(llm.calls()[0][0].content.contains("general, email, content"));
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_call() {
        let llm = Arc::new(ScriptedLLM::new(vec![]));
        let err = analyzer(llm.clone()).analyze("   ", &[], &categories()).await.unwrap_err();
        assert_eq!(err.issues, vec!["prompt must not be empty"]);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back() {
        let llm = Arc::new(ScriptedLLM::new(vec!["Sure, I can help!".into()]));
        let intent = analyzer(llm).analyze("Grow my newsletter", &[], &categories()).await.unwrap();
        assert_eq!(intent, Intent::fallback("Grow my newsletter"));
        assert_eq!(intent.required_capabilities, vec!["general"]);
    }

    #[tokio::test]
    async fn test_backend_error_falls_back() {
        let llm = Arc::new(ScriptedLLM::new(vec![]));
        llm.push_error("overloaded");
        let intent = analyzer(llm).analyze("Grow my newsletter", &[], &categories()).await.unwrap();
        assert_eq!(intent.required_capabilities, vec!["general"]);
    }

    #[tokio::test]
    async fn test_history_and_truncation() {
        let llm = Arc::new(ScriptedLLM::new(vec![r#"{"requiredCapabilities": []}"#.into()]));
        let config = IntentConfig {
            max_prompt_chars: 5,
            max_estimated_tasks: 12,
        };
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("noted")];
        let intent = IntentAnalyzer::new(llm.clone(), config)
            .analyze("héllo wörld", &history, &categories())
            .await
            .unwrap();

        let call = &llm.calls()[0];
        assert_eq!(call.len(), 4);
        assert_eq!(call[1].content, "earlier");
        assert_eq!(call[3].content, "héllo");
        assert_eq!(intent.goal_summary, "héllo");
        assert_eq!(intent.required_capabilities, vec!["general"]);
        assert_eq!(intent.estimated_task_count, 1);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("ab€cd", 3), "ab€");
        assert_eq!(truncate_chars("ab", 3), "ab");
    }
}
