//! Tool descriptors and the handler abstraction.
//!
//! A [`ToolDescriptor`] is the immutable catalog entry the planner reasons
//! about; a [`ToolHandler`] is what actually runs when a task invokes it.
//! The registry pairs the two.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// ToolDescriptor
// ---------------------------------------------------------------------------

/// Catalog entry for an invocable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Stable identifier (`category.name` for built-ins, `custom.<uuid>` otherwise).
    pub id: String,
    pub name: String,
    /// Tells the planner how, when and why to use the tool.
    pub description: String,
    /// Capability category matched against an intent's required capabilities.
    pub category: String,
    /// JSON Schema for the tool input.
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    #[serde(default)]
    pub is_custom: bool,
    /// Owning workspace for custom tools; `None` for built-ins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// Descriptor for a built-in tool.
    pub fn builtin(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            category: category.into(),
            input_schema: default_input_schema(),
            is_custom: false,
            workspace_id: None,
        }
    }

    /// Whether `workspace_id` may see and invoke this tool.
    pub fn visible_to(&self, workspace_id: &str) -> bool {
        match &self.workspace_id {
            None => true,
            Some(owner) => owner == workspace_id,
        }
    }
}

impl fmt::Display for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tool(id='{}', category='{}')", self.id, self.category)
    }
}

// ---------------------------------------------------------------------------
// ToolHandler trait
// ---------------------------------------------------------------------------

/// Result type of a handler invocation.
pub type ToolResult = Result<Value, Box<dyn std::error::Error + Send + Sync>>;

/// Executes a tool.
///
/// `input` is a JSON object. For task execution it carries `task`,
/// `expectedOutput`, `context`, `agent` and the resolved `inputs` map.
#[async_trait]
pub trait ToolHandler: Send + Sync + fmt::Debug {
    async fn invoke(&self, input: Value) -> ToolResult;
}

// ---------------------------------------------------------------------------
// FnTool
// ---------------------------------------------------------------------------

/// Type alias for a synchronous tool function.
pub type ToolFn = Arc<dyn Fn(Value) -> ToolResult + Send + Sync>;

/// Handler that wraps a plain closure.
#[derive(Clone)]
pub struct FnTool {
    label: String,
    func: ToolFn,
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("label", &self.label).finish()
    }
}

impl FnTool {
    pub fn new<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> ToolResult + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl ToolHandler for FnTool {
    async fn invoke(&self, input: Value) -> ToolResult {
        (self.func)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_visibility() {
        let builtin = ToolDescriptor::builtin("email.cold_email", "Cold email", "d", "email");
        assert!(builtin.visible_to("ws-1"));

        let mut custom = builtin.clone();
        custom.is_custom = true;
        custom.workspace_id = Some("ws-1".into());
        assert!(custom.visible_to("ws-1"));
        assert!(!custom.visible_to("ws-2"));
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let d = ToolDescriptor::builtin("research.market", "Market research", "d", "research");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["inputSchema"]["type"], "object");
        assert_eq!(v["isCustom"], false);
        assert!(v.get("workspaceId").is_none());
    }

    #[tokio::test]
    async fn test_fn_tool_invokes_closure() {
        let tool = FnTool::new("upper", |input: Value| {
            let text = input["task"].as_str().ok_or("missing task")?;
            Ok(json!(text.to_uppercase()))
        });
        assert_eq!(tool.invoke(json!({"task": "hi"})).await.unwrap(), json!("HI"));
        assert!(tool.invoke(json!({})).await.is_err());
    }
}
