//! Tool Registry.
//!
//! The core consumes the registry only through [`ToolRegistry`], which has
//! no mutating methods: execution can list and invoke tools but never
//! register or remove them. Tenant tool management lives on the concrete
//! [`InMemoryToolRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{EngineError, ToolInvocationError};
use crate::llms::BaseLLM;
use crate::tools::base_tool::{ToolDescriptor, ToolHandler};
use crate::tools::builtin::builtin_tools;

/// Read-only view of the tool catalog.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Built-ins plus the custom tools of `workspace_id`, in insertion order.
    fn list_tools(&self, workspace_id: &str) -> Vec<ToolDescriptor>;

    /// Invoke `tool_id` on behalf of `workspace_id`.
    async fn invoke(
        &self,
        workspace_id: &str,
        tool_id: &str,
        input: Value,
    ) -> Result<Value, ToolInvocationError>;

    /// Look up one visible descriptor.
    fn get_tool(&self, workspace_id: &str, tool_id: &str) -> Option<ToolDescriptor> {
        self.list_tools(workspace_id)
            .into_iter()
            .find(|t| t.id == tool_id)
    }
}

/// Request body for registering a tenant tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default = "default_custom_category")]
    pub category: String,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

fn default_custom_category() -> String {
    "general".to_string()
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Registry held in memory, ordered by registration.
#[derive(Default)]
pub struct InMemoryToolRegistry {
    entries: RwLock<Vec<RegisteredTool>>,
}

impl std::fmt::Debug for InMemoryToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryToolRegistry")
            .field("tools", &self.entries.read().len())
            .finish()
    }
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in prompt tool.
    pub fn with_builtins(llm: Arc<dyn BaseLLM>) -> Self {
        let registry = Self::new();
        for (descriptor, handler) in builtin_tools(llm) {
            registry.register(descriptor, Arc::new(handler));
        }
        registry
    }

    /// Add a tool under its own descriptor. A tool with the same id is replaced
    /// in place, keeping its position.
    pub fn register(&self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| e.descriptor.id == descriptor.id) {
            existing.descriptor = descriptor;
            existing.handler = handler;
        } else {
            entries.push(RegisteredTool { descriptor, handler });
        }
    }

    /// Register a tenant-scoped tool and return its descriptor.
    pub fn register_custom_tool(
        &self,
        workspace_id: &str,
        spec: CustomToolSpec,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<ToolDescriptor, EngineError> {
        if spec.name.trim().is_empty() {
            return Err(EngineError::InvalidRequest("custom tool name is empty".into()));
        }
        if workspace_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("workspace id is empty".into()));
        }
        let descriptor = ToolDescriptor {
            id: format!("custom.{}", Uuid::new_v4()),
            name: spec.name,
            description: spec.description,
            category: spec.category,
            input_schema: spec
                .input_schema
                .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            is_custom: true,
            workspace_id: Some(workspace_id.to_string()),
        };
        log::info!(
            "Registered custom tool {} ({}) for workspace {}",
            descriptor.id,
            descriptor.name,
            workspace_id
        );
        self.register(descriptor.clone(), handler);
        Ok(descriptor)
    }

    /// Remove a custom tool owned by `workspace_id`. Built-ins cannot be removed.
    pub fn delete_custom_tool(&self, workspace_id: &str, tool_id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| {
            !(e.descriptor.id == tool_id
                && e.descriptor.is_custom
                && e.descriptor.workspace_id.as_deref() == Some(workspace_id))
        });
        let removed = entries.len() < before;
        if removed {
            log::info!("Deleted custom tool {} from workspace {}", tool_id, workspace_id);
        }
        removed
    }
}

#[async_trait]
impl ToolRegistry for InMemoryToolRegistry {
    fn list_tools(&self, workspace_id: &str) -> Vec<ToolDescriptor> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.descriptor.visible_to(workspace_id))
            .map(|e| e.descriptor.clone())
            .collect()
    }

    async fn invoke(
        &self,
        workspace_id: &str,
        tool_id: &str,
        input: Value,
    ) -> Result<Value, ToolInvocationError> {
        let handler = {
            let entries = self.entries.read();
            entries
                .iter()
                .find(|e| e.descriptor.id == tool_id && e.descriptor.visible_to(workspace_id))
                .map(|e| e.handler.clone())
        };
        let handler = handler.ok_or_else(|| ToolInvocationError::not_found(tool_id))?;
        handler
            .invoke(input)
            .await
            .map_err(|e| ToolInvocationError::failed(tool_id, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolFailureKind;
    use crate::llms::ScriptedLLM;
    use crate::tools::base_tool::FnTool;
    use crate::tools::builtin::GENERAL_TOOL_ID;
    use serde_json::json;

    fn spec(name: &str) -> CustomToolSpec {
        CustomToolSpec {
            name: name.into(),
            description: "Look up CRM contacts".into(),
            category: "leads".into(),
            input_schema: None,
        }
    }

    fn echo() -> Arc<dyn ToolHandler> {
        Arc::new(FnTool::new("echo", |input| Ok(input)))
    }

    #[test]
    fn test_builtins_listed_in_order() {
        let registry = InMemoryToolRegistry::with_builtins(Arc::new(ScriptedLLM::new(vec![])));
        let tools = registry.list_tools("ws-1");
        assert_eq!(tools.len(), 9);
        assert_eq!(tools[0].id, GENERAL_TOOL_ID);
    }

    #[tokio::test]
    async fn test_custom_tools_are_tenant_scoped() {
        let registry = InMemoryToolRegistry::new();
        let tool = registry.register_custom_tool("ws-1", spec("CRM"), echo()).unwrap();
        assert!(tool.id.starts_with("custom."));
        assert!(tool.is_custom);

        assert_eq!(registry.list_tools("ws-1").len(), 1);
        assert!(registry.list_tools("ws-2").is_empty());

        let out = registry.invoke("ws-1", &tool.id, json!({"q": 1})).await.unwrap();
        assert_eq!(out, json!({"q": 1}));

        let err = registry.invoke("ws-2", &tool.id, json!({})).await.unwrap_err();
        assert_eq!(err.kind, ToolFailureKind::NotFound);
    }

    #[test]
    fn test_delete_only_own_custom_tools() {
        let registry = InMemoryToolRegistry::with_builtins(Arc::new(ScriptedLLM::new(vec![])));
        let tool = registry.register_custom_tool("ws-1", spec("CRM"), echo()).unwrap();

        assert!(!registry.delete_custom_tool("ws-2", &tool.id));
        assert!(!registry.delete_custom_tool("ws-1", GENERAL_TOOL_ID));
        assert!(registry.delete_custom_tool("ws-1", &tool.id));
        assert!(registry.get_tool("ws-1", &tool.id).is_none());
        assert!(registry.get_tool("ws-1", GENERAL_TOOL_ID).is_some());
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = InMemoryToolRegistry::new();
        let err = registry.register_custom_tool("ws-1", spec("  "), echo()).unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_tool_failure() {
        let registry = InMemoryToolRegistry::new();
        registry.register(
            ToolDescriptor::builtin("test.fail", "Fail", "always fails", "general"),
            Arc::new(FnTool::new("fail", |_| Err("upstream down".into()))),
        );
        let err = registry.invoke("ws", "test.fail", json!({})).await.unwrap_err();
        assert_eq!(err.kind, ToolFailureKind::Failed);
        assert!(err.message.contains("upstream down"));
    }
}
