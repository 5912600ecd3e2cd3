//! Task record.
//!
//! A task is one unit of work in a crew: a description, the output it is
//! expected to produce, the agent responsible for it and the earlier tasks
//! whose results it consumes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of work, executed by exactly one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// What needs to be done.
    pub description: String,
    /// Clear definition of the expected outcome.
    #[serde(default)]
    pub expected_output: String,
    /// The agent responsible for execution.
    pub agent_id: String,
    /// Earlier tasks whose results feed this task.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Additional free-text context.
    #[serde(default)]
    pub context: Option<String>,
    /// Preferred tool; must be one of the agent's tools.
    #[serde(default)]
    pub tool_id: Option<String>,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        expected_output: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            expected_output: expected_output.into(),
            agent_id: agent_id.into(),
            depends_on: Vec::new(),
            context: None,
            tool_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    /// Short label for logs.
    pub fn summary(&self) -> String {
        let desc: String = self.description.chars().take(60).collect();
        if desc.len() < self.description.len() {
            format!("{}...", desc)
        } else {
            desc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("Draft 3 ad headlines", "Three headlines", "a1")
            .with_id("t2")
            .with_dependencies(vec!["t1".into()])
            .with_context("Audience: founders")
            .with_tool("content.copywriter");
        assert_eq!(task.id, "t2");
        assert_eq!(task.depends_on, vec!["t1".to_string()]);
        assert_eq!(task.context.as_deref(), Some("Audience: founders"));
        assert_eq!(task.tool_id.as_deref(), Some("content.copywriter"));
    }

    #[test]
    fn test_summary_truncates_long_descriptions() {
        let task = Task::new("x".repeat(100), "", "a1");
        assert_eq!(task.summary().len(), 63);
        let short = Task::new("Short", "", "a1");
        assert_eq!(short.summary(), "Short");
    }

    #[test]
    fn test_depends_on_defaults_empty() {
        let task: Task =
            serde_json::from_str(r#"{"id":"t1","description":"d","agentId":"a1"}"#).unwrap();
        assert!(task.depends_on.is_empty());
        assert!(task.tool_id.is_none());
    }
}
