//! Prompt templates for the planning calls, rendered with Tera.

use once_cell::sync::Lazy;
use serde::Serialize;
use tera::{Context, Tera};

use crate::tools::ToolDescriptor;

const INTENT_SYSTEM: &str = r#"You analyse requests for a marketing automation platform.
Reply with a single JSON object and nothing else:
{"goalSummary": "<one sentence>", "requiredCapabilities": ["<category>", ...], "estimatedTaskCount": <integer>}
Pick capabilities from: {{ categories | join(sep=", ") }}.
Use "general" when nothing else fits. Keep estimatedTaskCount between 1 and {{ max_tasks }}."#;

const CREW_SYSTEM: &str = r#"You design crews of AI agents that carry out marketing work.
A crew has agents (each with a role, goal, backstory and a subset of tools) and an ordered list of tasks.

Available tools:
{% for tool in tools %}- {{ tool.id }} [{{ tool.category }}] {{ tool.name }}: {{ tool.description }}
{% endfor %}
Rules:
- At most {{ max_agents }} agents and {{ max_tasks }} tasks, at least one of each.
- Agents may only use the tool ids listed above.
- Every task names the id of one agent in "agent".
- "dependsOn" may only list ids of tasks that appear earlier in the list.
- "tool", when present, must be one of the assigned agent's tools.

Reply with a single JSON object and nothing else:
{"name": "...", "description": "...",
 "agents": [{"id": "...", "name": "...", "role": "...", "goal": "...", "backstory": "...", "avatarHint": "...", "tools": ["<tool id>"]}],
 "tasks": [{"id": "...", "description": "...", "expectedOutput": "...", "agent": "<agent id>", "dependsOn": ["<task id>"], "context": "...", "tool": "<tool id>"}]}"#;

const GENERATE_USER: &str = r#"Goal: {{ prompt }}

Summary: {{ intent.goal_summary }}
Capabilities needed: {{ intent.required_capabilities | join(sep=", ") }}
Expected number of tasks: about {{ intent.estimated_task_count }}"#;

const REFINE_USER: &str = r#"Here is the current crew:
{{ crew_json }}

Revise it according to this feedback. You may add, remove or edit agents and tasks.
Feedback: {{ feedback }}"#;

const CORRECTION_USER: &str = r#"That crew is not valid:
{% for issue in issues %}- {{ issue }}
{% endfor %}
Return the complete corrected crew as a single JSON object."#;

static TEMPLATES: Lazy<Tera> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    if let Err(e) = tera.add_raw_templates(vec![
        ("intent_system", INTENT_SYSTEM),
        ("crew_system", CREW_SYSTEM),
        ("generate_user", GENERATE_USER),
        ("refine_user", REFINE_USER),
        ("correction_user", CORRECTION_USER),
    ]) {
        log::error!("Failed to compile planning prompt templates: {}", e);
    }
    tera
});

fn render(name: &str, context: &Context) -> Result<String, String> {
    TEMPLATES
        .render(name, context)
        .map_err(|e| format!("failed to render prompt '{}': {}", name, e))
}

/// Intent summary as exposed to templates.
#[derive(Debug, Serialize)]
pub struct IntentView<'a> {
    pub goal_summary: &'a str,
    pub required_capabilities: &'a [String],
    pub estimated_task_count: usize,
}

pub fn intent_system(categories: &[String], max_tasks: usize) -> Result<String, String> {
    let mut context = Context::new();
    context.insert("categories", categories);
    context.insert("max_tasks", &max_tasks);
    render("intent_system", &context)
}

pub fn crew_system(
    tools: &[ToolDescriptor],
    max_agents: usize,
    max_tasks: usize,
) -> Result<String, String> {
    let mut context = Context::new();
    context.insert("tools", tools);
    context.insert("max_agents", &max_agents);
    context.insert("max_tasks", &max_tasks);
    render("crew_system", &context)
}

pub fn generate_user(prompt: &str, intent: &IntentView<'_>) -> Result<String, String> {
    let mut context = Context::new();
    context.insert("prompt", prompt);
    context.insert("intent", intent);
    render("generate_user", &context)
}

pub fn refine_user(crew_json: &str, feedback: &str) -> Result<String, String> {
    let mut context = Context::new();
    context.insert("crew_json", crew_json);
    context.insert("feedback", feedback);
    render("refine_user", &context)
}

pub fn correction_user(issues: &[String]) -> Result<String, String> {
    let mut context = Context::new();
    context.insert("issues", issues);
    render("correction_user", &context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crew_system_lists_tools() {
        let tools = vec![ToolDescriptor::builtin(
            "email.cold_email",
            "Cold email writer",
            "Drafts outreach emails",
            "email",
        )];
        let text = crew_system(&tools, 3, 5).unwrap();
        assert!(text.contains("- email.cold_email [email] Cold email writer: Drafts outreach emails"));
        assert!(text.contains("At most 3 agents and 5 tasks"));
    }

    #[test]
    fn test_intent_system_lists_categories() {
        let text = intent_system(&["general".into(), "email".into()], 12).unwrap();
        assert!(text.contains("Pick capabilities from: general, email."));
    }

    #[test]
    fn test_correction_lists_issues() {
        let text = correction_user(&["task t2 depends on unknown task t9".into()]).unwrap();
        assert!(text.contains("- task t2 depends on unknown task t9"));
    }

    #[test]
    fn test_prompt_text_is_not_escaped() {
        let intent = IntentView {
            goal_summary: "Sell <more> & faster",
            required_capabilities: &["content".to_string()],
            estimated_task_count: 2,
        };
        let text = generate_user("Sell \"widgets\"", &intent).unwrap();
        assert!(text.contains("Goal: Sell \"widgets\""));
        assert!(text.contains("Sell <more> & faster"));
    }
}
