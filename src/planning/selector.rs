//! Tool Selector.
//!
//! Ranks the tools visible to a workspace against an [`Intent`]. A tool
//! scores for its category's position in `required_capabilities` and for
//! capability keywords found in its name or description. Ranking is a
//! stable sort, so ties keep registry insertion order.

use std::sync::Arc;

use crate::config::SelectorConfig;
use crate::planning::intent::Intent;
use crate::tools::{ToolDescriptor, ToolRegistry, GENERAL_CATEGORY, GENERAL_TOOL_ID};

/// Weight of a direct category match, per remaining capability position.
const CATEGORY_WEIGHT: usize = 10;

pub struct ToolSelector {
    registry: Arc<dyn ToolRegistry>,
    config: SelectorConfig,
}

impl std::fmt::Debug for ToolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSelector").field("config", &self.config).finish()
    }
}

impl ToolSelector {
    pub fn new(registry: Arc<dyn ToolRegistry>, config: SelectorConfig) -> Self {
        Self { registry, config }
    }

    /// Ranked tools for `intent`, never empty while the workspace can see
    /// at least one tool.
    pub fn select(&self, intent: &Intent, workspace_id: &str) -> Vec<ToolDescriptor> {
        let available = self.registry.list_tools(workspace_id);
        let mut scored: Vec<(usize, ToolDescriptor)> = available
            .iter()
            .map(|tool| (score(tool, &intent.required_capabilities), tool.clone()))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut ranked: Vec<ToolDescriptor> = scored
            .into_iter()
            .take(self.config.max_tools.max(1))
            .map(|(_, tool)| tool)
            .collect();

        if ranked.is_empty() {
            if let Some(fallback) = fallback_tool(&available) {
                log::debug!(
                    "No tool matched {:?}; falling back to {}",
                    intent.required_capabilities,
                    fallback.id
                );
                ranked.push(fallback);
            } else {
                log::warn!("Workspace {} has no tools available", workspace_id);
            }
        }
        ranked
    }
}

fn score(tool: &ToolDescriptor, capabilities: &[String]) -> usize {
    let category = tool.category.to_lowercase();
    let text = format!("{} {}", tool.name, tool.description).to_lowercase();
    let mut total = 0;
    for (position, capability) in capabilities.iter().enumerate() {
        if *capability == category {
            total += (capabilities.len() - position) * CATEGORY_WEIGHT;
        } else if capability != GENERAL_CATEGORY && text.contains(capability.as_str()) {
            total += 1;
        }
    }
    total
}

fn fallback_tool(available: &[ToolDescriptor]) -> Option<ToolDescriptor> {
    available
        .iter()
        .find(|t| t.id == GENERAL_TOOL_ID)
        .or_else(|| available.iter().find(|t| t.category == GENERAL_CATEGORY))
        .or_else(|| available.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::ScriptedLLM;
    use crate::tools::{CustomToolSpec, FnTool, InMemoryToolRegistry};
    use serde_json::Value;

    fn intent(caps: &[&str]) -> Intent {
        Intent {
            goal_summary: "goal".into(),
            required_capabilities: caps.iter().map(|c| c.to_string()).collect(),
            estimated_task_count: 2,
        }
    }

    fn registry() -> Arc<InMemoryToolRegistry> {
        Arc::new(InMemoryToolRegistry::with_builtins(Arc::new(ScriptedLLM::new(vec![]))))
    }

    fn ids(tools: &[ToolDescriptor]) -> Vec<&str> {
        tools.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_ranked_by_capability_order() {
        let selector = ToolSelector::new(registry(), SelectorConfig::default());
        let tools = selector.select(&intent(&["email", "content"]), "ws-1");
        assert_eq!(ids(&tools)[..2], ["email.cold_email", "content.copywriter"]);
    }

    #[test]
    fn test_fallback_to_general_tool() {
        let selector = ToolSelector::new(registry(), SelectorConfig::default());
        let tools = selector.select(&intent(&["astrology"]), "ws-1");
        assert_eq!(ids(&tools), vec![GENERAL_TOOL_ID]);
    }

    #[test]
    fn test_respects_max_tools_and_is_deterministic() {
        let selector = ToolSelector::new(registry(), SelectorConfig { max_tools: 2 });
        let caps = intent(&["social", "leads", "pricing", "analytics"]);
        let first = selector.select(&caps, "ws-1");
        assert_eq!(ids(&first), vec!["social.posts", "leads.generator"]);
        assert_eq!(first, selector.select(&caps, "ws-1"));
    }

    #[test]
    fn test_custom_tools_only_for_their_workspace() {
        let registry = registry();
        let handler = Arc::new(FnTool::new("crm", |_| Ok(Value::Null)));
        let crm = registry
            .register_custom_tool(
                "ws-1",
                CustomToolSpec {
                    name: "CRM lookup".into(),
                    description: "Find leads in our CRM".into(),
                    category: "leads".into(),
                    input_schema: None,
                },
                handler,
            )
            .unwrap();
        let selector = ToolSelector::new(registry, SelectorConfig::default());

        let ws1 = selector.select(&intent(&["leads"]), "ws-1");
        assert_eq!(ids(&ws1), vec!["leads.generator", crm.id.as_str()]);
        let ws2 = selector.select(&intent(&["leads"]), "ws-2");
        assert_eq!(ids(&ws2), vec!["leads.generator"]);
    }

    #[test]
    fn test_empty_registry_yields_nothing() {
        let selector = ToolSelector::new(
            Arc::new(InMemoryToolRegistry::new()),
            SelectorConfig::default(),
        );
        assert!(selector.select(&intent(&["email"]), "ws-1").is_empty());
    }
}
