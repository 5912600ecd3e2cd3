//! Agent record.
//!
//! An agent is a named role bound to a subset of callable tools. Agents are
//! created only by crew generation and are frozen once their crew is saved.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A role within a crew, responsible for one or more tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Unique identifier within the crew.
    pub id: String,
    /// Display name (e.g., "Market Researcher").
    pub name: String,
    /// The role the agent plays.
    pub role: String,
    /// What the agent is trying to achieve.
    pub goal: String,
    /// Background that shapes the agent's perspective.
    #[serde(default)]
    pub backstory: String,
    /// UI hint for rendering (emoji, icon name, colour).
    #[serde(default)]
    pub avatar_hint: Option<String>,
    /// Tools this agent may invoke, by `ToolDescriptor::id`.
    #[serde(default)]
    pub tool_ids: Vec<String>,
}

impl Agent {
    /// Create a new agent with a fresh id and no tools.
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            avatar_hint: None,
            tool_ids: Vec::new(),
        }
    }

    /// Builder: assign tools.
    pub fn with_tools(mut self, tool_ids: Vec<String>) -> Self {
        self.tool_ids = tool_ids;
        self
    }

    /// Builder: override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether the agent is permitted to call `tool_id`.
    pub fn can_use(&self, tool_id: &str) -> bool {
        self.tool_ids.iter().any(|t| t == tool_id)
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Agent(name={}, role={}, tools={})", self.name, self.role, self.tool_ids.len())
    }
}
