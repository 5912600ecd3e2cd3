//! Crew Generator.
//!
//! Pipeline: Intent Analyzer -> Tool Selector -> synthesis call -> draft
//! normalization -> structural validation. A draft that fails to parse or
//! validate earns exactly one corrective retry; a second failure surfaces
//! as [`CrewSynthesisError`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::GeneratorConfig;
use crate::crew::Crew;
use crate::errors::{CrewSynthesisError, EngineResult, ValidationError};
use crate::llms::{BaseLLM, CallOptions, ChatMessage};
use crate::planning::intent::{Intent, IntentAnalyzer};
use crate::planning::parser::{parse_crew_draft, CrewDraft};
use crate::planning::prompts::{self, IntentView};
use crate::planning::selector::ToolSelector;
use crate::store::ExecutionStore;
use crate::task::Task;
use crate::tools::{ToolDescriptor, ToolRegistry};

/// Synthesis attempts: the first call plus one corrective retry.
const SYNTHESIS_ATTEMPTS: u32 = 2;

/// Input to [`CrewGenerator::generate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub user_prompt: String,
    pub workspace_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
}

pub struct CrewGenerator {
    llm: Arc<dyn BaseLLM>,
    registry: Arc<dyn ToolRegistry>,
    store: Arc<dyn ExecutionStore>,
    analyzer: IntentAnalyzer,
    selector: ToolSelector,
    config: GeneratorConfig,
}

impl std::fmt::Debug for CrewGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrewGenerator")
            .field("model", &self.llm.model())
            .field("analyzer", &self.analyzer)
            .field("selector", &self.selector)
            .field("config", &self.config)
            .finish()
    }
}

impl CrewGenerator {
    pub fn new(
        llm: Arc<dyn BaseLLM>,
        registry: Arc<dyn ToolRegistry>,
        store: Arc<dyn ExecutionStore>,
        analyzer: IntentAnalyzer,
        selector: ToolSelector,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            store,
            analyzer,
            selector,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Fresh generation
    // -----------------------------------------------------------------------

    pub async fn generate(&self, request: GenerateRequest) -> EngineResult<Crew> {
        let categories = self.categories(&request.workspace_id);
        let intent = self
            .analyzer
            .analyze(&request.user_prompt, &request.conversation_history, &categories)
            .await?;
        let tools = self.selector.select(&intent, &request.workspace_id);
        log::info!(
            "Generating crew for workspace {} with {} candidate tools",
            request.workspace_id,
            tools.len()
        );

        let system = self.crew_system(&tools)?;
        let user = prompts::generate_user(request.user_prompt.trim(), &intent_view(&intent))
            .map_err(|reason| synthesis_error(0, reason))?;

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(request.conversation_history.iter().cloned());
        messages.push(ChatMessage::user(user));

        let crew = self
            .synthesize(messages, &tools)
            .await?
            .scoped(&request.workspace_id, &request.owner_id);
        log::info!(
            "Generated crew {} '{}' ({} agents, {} tasks)",
            crew.id,
            crew.name,
            crew.agents.len(),
            crew.tasks.len()
        );
        Ok(crew)
    }

    // -----------------------------------------------------------------------
    // Refinement
    // -----------------------------------------------------------------------

    /// Produce a revised crew. `existing` is never modified; the result has
    /// a new id and `revision_of = existing.id`.
    pub async fn refine(
        &self,
        existing: &Crew,
        feedback: &str,
        history: &[ChatMessage],
    ) -> EngineResult<Crew> {
        let workspace_id = existing.workspace_id.as_str();
        let categories = self.categories(workspace_id);
        let intent = self.analyzer.analyze(feedback, history, &categories).await?;

        // Keep the tools the crew already uses, after the freshly ranked ones.
        let mut tools = self.selector.select(&intent, workspace_id);
        let mut seen: HashSet<String> = tools.iter().map(|t| t.id.clone()).collect();
        for agent in &existing.agents {
            for tool_id in &agent.tool_ids {
                if seen.insert(tool_id.clone()) {
                    if let Some(tool) = self.registry.get_tool(workspace_id, tool_id) {
                        tools.push(tool);
                    }
                }
            }
        }

        let crew_json = serde_json::to_string_pretty(&CrewContext::from(existing))
            .map_err(|e| synthesis_error(0, e.to_string()))?;
        let system = self.crew_system(&tools)?;
        let user = prompts::refine_user(&crew_json, feedback.trim())
            .map_err(|reason| synthesis_error(0, reason))?;

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(user));

        let mut refined = self
            .synthesize(messages, &tools)
            .await?
            .scoped(&existing.workspace_id, &existing.owner_id);
        refined.revision_of = Some(existing.id.clone());

        if refined.key() == existing.key() {
            log::info!("Refinement of crew {} produced no structural change", existing.id);
        }
        log::info!("Refined crew {} into {}", existing.id, refined.id);
        Ok(refined)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Persist `crew` under `workspace_id`/`owner_id` and return the stored id.
    ///
    /// A crew whose id is already stored is saved as a distinct copy with a
    /// fresh id; content is never deduplicated.
    pub async fn save(&self, crew: &Crew, workspace_id: &str, owner_id: &str) -> EngineResult<String> {
        crew.validate()?;
        let mut record = crew.clone().scoped(workspace_id, owner_id);
        if self.store.get_crew(&record.id).await?.is_some() {
            record.id = Uuid::new_v4().to_string();
        }
        self.store.save_crew(&record).await?;
        log::info!("Saved crew {} for workspace {}", record.id, workspace_id);
        Ok(record.id)
    }

    // -----------------------------------------------------------------------
    // Synthesis
    // -----------------------------------------------------------------------

    async fn synthesize(
        &self,
        mut messages: Vec<ChatMessage>,
        tools: &[ToolDescriptor],
    ) -> Result<Crew, CrewSynthesisError> {
        let options = CallOptions::json(Some(self.config.temperature));
        let mut last_reason = String::new();

        for attempt in 1..=SYNTHESIS_ATTEMPTS {
            let reply = match self.llm.acall(&messages, &options).await {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!("Crew synthesis attempt {} failed: {}", attempt, e);
                    last_reason = e.to_string();
                    continue;
                }
            };

            let issues = match parse_crew_draft(&reply) {
                Ok(draft) => match self.build_crew(draft, tools) {
                    Ok(crew) => {
                        log::debug!("Crew synthesis succeeded on attempt {}", attempt);
                        return Ok(crew);
                    }
                    Err(e) => e.issues,
                },
                Err(reason) => vec![reason],
            };
            log::warn!(
                "Crew synthesis attempt {} rejected: {}",
                attempt,
                issues.join("; ")
            );
            last_reason = issues.join("; ");

            if attempt < SYNTHESIS_ATTEMPTS {
                let correction = prompts::correction_user(&issues)
                    .map_err(|reason| synthesis_error(attempt, reason))?;
                messages.push(ChatMessage::assistant(reply));
                messages.push(ChatMessage::user(correction));
            }
        }

        Err(synthesis_error(SYNTHESIS_ATTEMPTS, last_reason))
    }

    /// Turn a draft into a crew restricted to `tools`, then validate it.
    fn build_crew(&self, draft: CrewDraft, tools: &[ToolDescriptor]) -> Result<Crew, ValidationError> {
        let mut issues = Vec::new();
        if draft.agents.len() > self.config.max_agents {
            issues.push(format!(
                "crew has {} agents, at most {} allowed",
                draft.agents.len(),
                self.config.max_agents
            ));
        }
        if draft.tasks.len() > self.config.max_tasks {
            issues.push(format!(
                "crew has {} tasks, at most {} allowed",
                draft.tasks.len(),
                self.config.max_tasks
            ));
        }

        let allowed: HashSet<&str> = tools.iter().map(|t| t.id.as_str()).collect();
        let agents: Vec<Agent> = draft
            .agents
            .into_iter()
            .enumerate()
            .map(|(i, a)| {
                let id = non_empty(a.id).unwrap_or_else(|| format!("agent-{}", i + 1));
                let mut tool_ids: Vec<String> = Vec::new();
                for tool_id in a.tools {
                    if !allowed.contains(tool_id.as_str()) {
                        log::warn!("Dropping unknown tool '{}' from agent {}", tool_id, id);
                    } else if !tool_ids.contains(&tool_id) {
                        tool_ids.push(tool_id);
                    }
                }
                if tool_ids.is_empty() {
                    if let Some(top) = tools.first() {
                        tool_ids.push(top.id.clone());
                    }
                }
                let name = if a.name.trim().is_empty() { a.role.clone() } else { a.name };
                let mut agent = Agent::new(name, a.role, a.goal, a.backstory)
                    .with_id(id)
                    .with_tools(tool_ids);
                agent.avatar_hint = non_empty(a.avatar_hint);
                agent
            })
            .collect();

        let tasks: Vec<Task> = draft
            .tasks
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                let id = non_empty(t.id).unwrap_or_else(|| format!("task-{}", i + 1));
                let tool_id = non_empty(t.tool).filter(|tool| {
                    agents
                        .iter()
                        .any(|a| a.id == t.agent && a.can_use(tool))
                });
                let mut task = Task::new(t.description, t.expected_output, t.agent)
                    .with_id(id)
                    .with_dependencies(t.depends_on);
                task.context = non_empty(t.context);
                task.tool_id = tool_id;
                task
            })
            .collect();

        let name = match draft.name.trim() {
            "" => "Untitled crew".to_string(),
            name => name.to_string(),
        };
        let crew = Crew::new(name, draft.description, agents, tasks);
        if let Err(e) = crew.validate() {
            issues.extend(e.issues);
        }
        if issues.is_empty() {
            Ok(crew)
        } else {
            Err(ValidationError::from_issues(issues))
        }
    }

    fn crew_system(&self, tools: &[ToolDescriptor]) -> Result<String, CrewSynthesisError> {
        prompts::crew_system(tools, self.config.max_agents, self.config.max_tasks)
            .map_err(|reason| synthesis_error(0, reason))
    }

    fn categories(&self, workspace_id: &str) -> Vec<String> {
        let mut categories: Vec<String> = Vec::new();
        for tool in self.registry.list_tools(workspace_id) {
            if !categories.contains(&tool.category) {
                categories.push(tool.category);
            }
        }
        categories
    }
}

/// The parts of a crew shown to the model during refinement.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrewContext<'a> {
    name: &'a str,
    description: &'a str,
    agents: &'a [Agent],
    tasks: &'a [Task],
}

impl<'a> From<&'a Crew> for CrewContext<'a> {
    fn from(crew: &'a Crew) -> Self {
        Self {
            name: &crew.name,
            description: &crew.description,
            agents: &crew.agents,
            tasks: &crew.tasks,
        }
    }
}

fn intent_view(intent: &Intent) -> IntentView<'_> {
    IntentView {
        goal_summary: &intent.goal_summary,
        required_capabilities: &intent.required_capabilities,
        estimated_task_count: intent.estimated_task_count,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn synthesis_error(attempts: u32, reason: impl Into<String>) -> CrewSynthesisError {
    CrewSynthesisError {
        attempts,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntentConfig, SelectorConfig};
    use crate::errors::EngineError;
    use crate::llms::ScriptedLLM;
    use crate::store::InMemoryExecutionStore;
    use crate::tools::InMemoryToolRegistry;

    const INTENT: &str = r#"{"goalSummary": "Launch campaign", "requiredCapabilities": ["research", "content"], "estimatedTaskCount": 2}"#;

    const VALID_CREW: &str = r#"```json
    {"name": "Launch crew", "description": "Researches then writes",
     "agents": [
       {"id": "researcher", "name": "Rita", "role": "Market researcher", "goal": "Know the audience", "tools": ["research.market"]},
       {"id": "writer", "name": "Will", "role": "Copywriter", "goal": "Write ads", "tools": ["content.copywriter", "crystal.ball"]}
     ],
     "tasks": [
       {"id": "t1", "description": "Research the audience", "expectedOutput": "Brief", "agent": "researcher"},
       {"id": "t2", "description": "Write three ads", "expectedOutput": "Ads", "agent": "writer", "dependsOn": ["t1"], "tool": "content.copywriter"}
     ]}
    ```"#;

    const FORWARD_DEP_CREW: &str = r#"{"name": "Broken",
     "agents": [{"id": "a", "name": "A", "role": "Writer", "goal": "Write", "tools": ["content.copywriter"]}],
     "tasks": [
       {"id": "t1", "description": "Write", "agent": "a", "dependsOn": ["t2"]},
       {"id": "t2", "description": "Review", "agent": "a"}
     ]}"#;

    struct Fixture {
        llm: Arc<ScriptedLLM>,
        store: Arc<InMemoryExecutionStore>,
        generator: CrewGenerator,
    }

    fn fixture(replies: &[&str]) -> Fixture {
        let llm = Arc::new(ScriptedLLM::new(replies.iter().map(|r| r.to_string()).collect()));
        let registry = Arc::new(InMemoryToolRegistry::with_builtins(llm.clone()));
        let store = Arc::new(InMemoryExecutionStore::new());
        let generator = CrewGenerator::new(
            llm.clone(),
            registry.clone(),
            store.clone(),
            IntentAnalyzer::new(llm.clone(), IntentConfig::default()),
            ToolSelector::new(registry, SelectorConfig::default()),
            GeneratorConfig::default(),
        );
        Fixture {
            llm,
            store,
            generator,
        }
    }

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest {
            user_prompt: prompt.into(),
            workspace_id: "ws-1".into(),
            owner_id: "user-1".into(),
            conversation_history: vec![],
        }
    }

    #[tokio::test]
    async fn test_generate_valid_crew() {
        let f = fixture(&[INTENT, VALID_CREW]);
        let crew = f.generator.generate(request("Launch my SaaS")).await.unwrap();

        assert_eq!(crew.name, "Launch crew");
        assert_eq!(crew.workspace_id, "ws-1");
        assert_eq!(crew.owner_id, "user-1");
        assert_eq!(crew.tasks[1].depends_on, vec!["t1"]);
        assert_eq!(crew.tasks[1].tool_id.as_deref(), Some("content.copywriter"));
        // unknown tool dropped
        assert_eq!(crew.agents[1].tool_ids, vec!["content.copywriter"]);
        assert!(crew.validate().is_ok());

        let synthesis = &f.llm.calls()[1];
        assert!(synthesis[0].content.contains("research.market"));
        assert!(synthesis.last().unwrap().content.contains("Goal: Launch my SaaS"));
    }

    #[tokio::test]
    async fn test_one_corrective_retry() {
        let f = fixture(&[INTENT, FORWARD_DEP_CREW, VALID_CREW]);
        let crew = f.generator.generate(request("Launch my SaaS")).await.unwrap();
        assert_eq!(crew.tasks.len(), 2);

        let calls = f.llm.calls();
        assert_eq!(calls.len(), 3);
        let retry = &calls[2];
        assert_eq!(retry[retry.len() - 2].role, "assistant");
        assert!(retry.last().unwrap().content.contains("not valid"));
        assert!(retry.last().unwrap().content.contains("t2"));
    }

    #[tokio::test]
    async fn test_second_invalid_draft_is_synthesis_error() {
        let f = fixture(&[INTENT, FORWARD_DEP_CREW, "no idea"]);
        let err = f.generator.generate(request("Launch my SaaS")).await.unwrap_err();
        match err {
            EngineError::Synthesis(e) => {
                assert_eq!(e.attempts, 2);
                assert!(e.reason.contains("invalid crew JSON"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.llm.call_count(), 3);
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_validation_error() {
        let f = fixture(&[]);
        let err = f.generator.generate(request("  ")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(f.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_intent_failure_still_generates() {
        let f = fixture(&["not json", VALID_CREW]);
        let crew = f.generator.generate(request("Launch my SaaS")).await.unwrap();
        assert_eq!(crew.agents.len(), 2);
        // fallback intent ranks only the general tool
        assert!(f.llm.calls()[1][0].content.contains("general.reasoning"));
    }

    #[tokio::test]
    async fn test_toolless_agent_gets_top_ranked_tool() {
        let crew_json = r#"{"name": "Solo",
            "agents": [{"id": "a", "role": "Researcher", "goal": "Dig", "tools": ["nope"]}],
            "tasks": [{"description": "Dig", "agent": "a", "tool": "nope"}]}"#;
        let f = fixture(&[INTENT, crew_json]);
        let crew = f.generator.generate(request("Research rivals")).await.unwrap();
        assert_eq!(crew.agents[0].tool_ids, vec!["research.market"]);
        assert_eq!(crew.agents[0].name, "Researcher");
        assert_eq!(crew.tasks[0].id, "task-1");
        assert_eq!(crew.tasks[0].tool_id, None);
    }

    #[tokio::test]
    async fn test_refine_creates_new_revision() {
        let f = fixture(&[INTENT, VALID_CREW, INTENT, VALID_CREW]);
        let original = f.generator.generate(request("Launch my SaaS")).await.unwrap();
        let original_id = f.generator.save(&original, "ws-1", "user-1").await.unwrap();
        let before = f.store.get_crew(&original_id).await.unwrap().unwrap();

        let refined = f
            .generator
            .refine(&before, "Make the ads punchier", &[ChatMessage::user("hi")])
            .await
            .unwrap();

        assert_ne!(refined.id, original_id);
        assert_eq!(refined.revision_of.as_deref(), Some(original_id.as_str()));
        assert_eq!(refined.workspace_id, "ws-1");
        let after = f.store.get_crew(&original_id).await.unwrap().unwrap();
        assert_eq!(after, before);

        let refine_call = &f.llm.calls()[3];
        let user = &refine_call.last().unwrap().content;
        assert!(user.contains("Make the ads punchier"));
        assert!(user.contains("Research the audience"));
    }

    #[tokio::test]
    async fn test_save_twice_creates_distinct_copies() {
        let f = fixture(&[INTENT, VALID_CREW]);
        let crew = f.generator.generate(request("Launch my SaaS")).await.unwrap();
        let first = f.generator.save(&crew, "ws-1", "user-1").await.unwrap();
        let second = f.generator.save(&crew, "ws-1", "user-1").await.unwrap();
        assert_eq!(first, crew.id);
        assert_ne!(first, second);
        assert_eq!(f.store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_too_many_tasks_rejected() {
        let f = fixture(&[INTENT, VALID_CREW, VALID_CREW]);
        let mut generator = f.generator;
        generator.config.max_tasks = 1;
        let err = generator.generate(request("Launch")).await.unwrap_err();
        match err {
            EngineError::Synthesis(e) => assert!(e.reason.contains("at most 1 allowed")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
