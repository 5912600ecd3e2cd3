//! Parsing of reasoning-backend replies into plan drafts.
//!
//! Replies are expected to be a single JSON object, but models routinely
//! wrap it in a markdown fence or surround it with prose. [`extract_json`]
//! recovers the object before deserialization.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").unwrap());

/// Locate the JSON object in a model reply.
///
/// Tries a fenced block first, then the span from the first `{` to the last
/// `}`, and finally returns the trimmed reply unchanged.
pub fn extract_json(reply: &str) -> &str {
    if let Some(caps) = FENCED_JSON.captures(reply) {
        if let Some(body) = caps.get(1) {
            return body.as_str();
        }
    }
    match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => reply.trim(),
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentDraft {
    #[serde(default, alias = "goal_summary", alias = "goal")]
    pub goal_summary: String,
    #[serde(default, alias = "required_capabilities", alias = "capabilities")]
    pub required_capabilities: Vec<String>,
    #[serde(default, alias = "estimated_task_count")]
    pub estimated_task_count: Option<u64>,
}

pub fn parse_intent(reply: &str) -> Result<IntentDraft, String> {
    serde_json::from_str(extract_json(reply)).map_err(|e| format!("invalid intent JSON: {}", e))
}

// ---------------------------------------------------------------------------
// Crew
// ---------------------------------------------------------------------------

/// Agent as proposed by the synthesis call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub backstory: String,
    #[serde(default, alias = "avatar_hint", alias = "avatar")]
    pub avatar_hint: Option<String>,
    #[serde(default, alias = "toolIds", alias = "tool_ids")]
    pub tools: Vec<String>,
}

/// Task as proposed by the synthesis call. `agent` refers to an
/// [`AgentDraft::id`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "expected_output")]
    pub expected_output: String,
    #[serde(default, alias = "agentId", alias = "agent_id")]
    pub agent: String,
    #[serde(default, alias = "depends_on", alias = "dependencies")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, alias = "toolId", alias = "tool_id")]
    pub tool: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agents: Vec<AgentDraft>,
    #[serde(default)]
    pub tasks: Vec<TaskDraft>,
}

pub fn parse_crew_draft(reply: &str) -> Result<CrewDraft, String> {
    serde_json::from_str(extract_json(reply)).map_err(|e| format!("invalid crew JSON: {}", e))
}
