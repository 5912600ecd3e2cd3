//! Built-in marketing tools.
//!
//! Each built-in is a [`PromptTool`]: a capability-specific system prompt in
//! front of the shared reasoning backend. One tool per capability category.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llms::{BaseLLM, CallOptions, ChatMessage};
use crate::tools::base_tool::{ToolDescriptor, ToolHandler, ToolResult};

/// Category used for the generic fallback capability.
pub const GENERAL_CATEGORY: &str = "general";

/// Id of the generic fallback tool.
pub const GENERAL_TOOL_ID: &str = "general.reasoning";

/// `(id, name, category, description, instructions)`
const CATALOG: &[(&str, &str, &str, &str, &str)] = &[
    (
        GENERAL_TOOL_ID,
        "General reasoning",
        GENERAL_CATEGORY,
        "Answer, summarize, plan or draft anything that no specialised tool covers.",
        "Complete the task directly and concisely.",
    ),
    (
        "research.market",
        "Market research",
        "research",
        "Research a market, audience, competitors or positioning and report findings.",
        "Produce a structured research brief: audience, competitors, positioning, key insights.",
    ),
    (
        "content.copywriter",
        "Ad copywriter",
        "content",
        "Write ad copy, headlines, landing page text and other marketing content.",
        "Write persuasive marketing copy. Offer several variants when appropriate.",
    ),
    (
        "email.cold_email",
        "Cold email writer",
        "email",
        "Write cold outreach and follow-up email sequences.",
        "Write a short, personalised cold email with a subject line and a clear call to action.",
    ),
    (
        "strategy.growth_plan",
        "Growth strategist",
        "strategy",
        "Design growth plans, launch plans and go-to-market strategy.",
        "Produce a phased growth plan with channels, milestones and success metrics.",
    ),
    (
        "pricing.advisor",
        "Pricing advisor",
        "pricing",
        "Propose pricing tiers, price points and packaging.",
        "Recommend pricing tiers with price points and the rationale for each.",
    ),
    (
        "leads.generator",
        "Lead generator",
        "leads",
        "Identify ideal customer profiles and lead sources.",
        "Describe the ideal customer profile and list concrete lead sources and qualification criteria.",
    ),
    (
        "social.posts",
        "Social media writer",
        "social",
        "Write social media posts and content calendars.",
        "Write platform-appropriate social posts with hashtags where relevant.",
    ),
    (
        "analytics.metrics",
        "Marketing analyst",
        "analytics",
        "Define KPIs, analyse campaign metrics and recommend optimisations.",
        "Define the metrics to track and interpret any numbers provided in the inputs.",
    ),
];

/// Descriptors of every built-in tool, in registry order.
pub fn builtin_descriptors() -> Vec<ToolDescriptor> {
    CATALOG
        .iter()
        .map(|(id, name, category, description, _)| {
            let mut descriptor = ToolDescriptor::builtin(*id, *name, *description, *category);
            descriptor.input_schema = serde_json::json!({
                "type": "object",
                "properties": {
                    "task": { "type": "string" },
                    "expectedOutput": { "type": "string" },
                    "inputs": { "type": "object" }
                },
                "required": ["task"]
            });
            descriptor
        })
        .collect()
}

/// Built-in tools paired with their handlers.
pub fn builtin_tools(llm: Arc<dyn BaseLLM>) -> Vec<(ToolDescriptor, PromptTool)> {
    builtin_descriptors()
        .into_iter()
        .zip(CATALOG.iter())
        .map(|(descriptor, (_, name, _, _, instructions))| {
            let tool = PromptTool::new(*name, *instructions, llm.clone());
            (descriptor, tool)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// PromptTool
// ---------------------------------------------------------------------------

/// Handler that answers through the reasoning backend.
pub struct PromptTool {
    name: String,
    instructions: String,
    llm: Arc<dyn BaseLLM>,
}

impl fmt::Debug for PromptTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptTool")
            .field("name", &self.name)
            .field("model", &self.llm.model())
            .finish()
    }
}

impl PromptTool {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        llm: Arc<dyn BaseLLM>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            llm,
        }
    }

    /// Render the conversation for one invocation.
    pub fn build_messages(&self, input: &Value) -> Vec<ChatMessage> {
        let mut system = format!("You are acting as the {} tool. {}", self.name, self.instructions);
        if let Some(agent) = input.get("agent") {
            let field = |key: &str| agent.get(key).and_then(Value::as_str).unwrap_or("");
            system.push_str(&format!(
                "\n\nRole: {}\nGoal: {}\nBackstory: {}",
                field("role"),
                field("goal"),
                field("backstory")
            ));
        }

        let mut user = input
            .get("task")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string());
        if let Some(expected) = input.get("expectedOutput").and_then(Value::as_str) {
            if !expected.is_empty() {
                user.push_str(&format!("\n\nExpected output: {}", expected));
            }
        }
        if let Some(context) = input.get("context").and_then(Value::as_str) {
            user.push_str(&format!("\n\nContext: {}", context));
        }
        if let Some(inputs) = input.get("inputs").and_then(Value::as_object) {
            if !inputs.is_empty() {
                user.push_str(&format!("\n\nInputs:\n{}", Value::Object(inputs.clone())));
            }
        }
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

#[async_trait]
impl ToolHandler for PromptTool {
    async fn invoke(&self, input: Value) -> ToolResult {
        let messages = self.build_messages(&input);
        let output = self.llm.acall(&messages, &CallOptions::default()).await?;
        Ok(Value::String(output))
    }
}
