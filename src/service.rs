//! `CrewService`: the operations the surrounding application calls.
//!
//! The service wires the planning and execution components together over
//! injected collaborators (reasoning backend, execution store, tool
//! registry). It keeps no per-call state of its own; everything durable
//! lives in the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::crew::Crew;
use crate::errors::{EngineError, EngineResult};
use crate::execution::{
    subscribe_progress, CrewExecutor, Execution, ExecutionStarted, ExecutionTicket, ProgressEvent,
    ProgressHub,
};
use crate::llms::{BaseLLM, ChatMessage};
use crate::planning::{CrewGenerator, GenerateRequest, IntentAnalyzer, ToolSelector};
use crate::store::{ExecutionFilter, ExecutionStore};
use crate::tools::builtin::builtin_tools;
use crate::tools::{
    CustomToolSpec, InMemoryToolRegistry, ToolDescriptor, ToolHandler, ToolRegistry, WebhookTool,
    GENERAL_TOOL_ID,
};

pub struct CrewService {
    config: EngineConfig,
    registry: Arc<InMemoryToolRegistry>,
    store: Arc<dyn ExecutionStore>,
    hub: ProgressHub,
    generator: CrewGenerator,
    executor: CrewExecutor,
}

impl std::fmt::Debug for CrewService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrewService")
            .field("generator", &self.generator)
            .field("executor", &self.executor)
            .finish()
    }
}

impl CrewService {
    /// Service with the built-in tool catalog backed by `llm`.
    pub fn new(config: EngineConfig, llm: Arc<dyn BaseLLM>, store: Arc<dyn ExecutionStore>) -> Self {
        let registry = Arc::new(InMemoryToolRegistry::with_builtins(llm.clone()));
        Self::with_registry(config, llm, store, registry)
    }

    /// Service over a caller-supplied registry. The generic reasoning tool
    /// is added when the registry lacks it, so tool selection always has a
    /// fallback.
    pub fn with_registry(
        config: EngineConfig,
        llm: Arc<dyn BaseLLM>,
        store: Arc<dyn ExecutionStore>,
        registry: Arc<InMemoryToolRegistry>,
    ) -> Self {
        if registry.get_tool("", GENERAL_TOOL_ID).is_none() {
            if let Some((descriptor, tool)) = builtin_tools(llm.clone())
                .into_iter()
                .find(|(d, _)| d.id == GENERAL_TOOL_ID)
            {
                registry.register(descriptor, Arc::new(tool));
            }
        }
        let hub = ProgressHub::new(config.progress.channel_capacity);
        let tools: Arc<dyn ToolRegistry> = registry.clone();
        let generator = CrewGenerator::new(
            llm.clone(),
            tools.clone(),
            store.clone(),
            IntentAnalyzer::new(llm.clone(), config.intent.clone()),
            ToolSelector::new(tools.clone(), config.selector.clone()),
            config.generator.clone(),
        );
        let executor = CrewExecutor::new(
            tools,
            store.clone(),
            llm,
            hub.clone(),
            config.executor.clone(),
        );
        Self {
            config,
            registry,
            store,
            hub,
            generator,
            executor,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Crews
    // -----------------------------------------------------------------------

    pub async fn generate_crew(
        &self,
        user_prompt: &str,
        workspace_id: &str,
        owner_id: &str,
        conversation_history: Vec<ChatMessage>,
    ) -> EngineResult<Crew> {
        self.generator
            .generate(GenerateRequest {
                user_prompt: user_prompt.to_string(),
                workspace_id: workspace_id.to_string(),
                owner_id: owner_id.to_string(),
                conversation_history,
            })
            .await
    }

    pub async fn refine_crew(
        &self,
        crew: &Crew,
        feedback: &str,
        conversation_history: &[ChatMessage],
    ) -> EngineResult<Crew> {
        self.generator.refine(crew, feedback, conversation_history).await
    }

    pub async fn save_crew(&self, crew: &Crew, workspace_id: &str, owner_id: &str) -> EngineResult<String> {
        self.generator.save(crew, workspace_id, owner_id).await
    }

    pub async fn get_crew(&self, crew_id: &str) -> EngineResult<Crew> {
        self.store
            .get_crew(crew_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "crew",
                id: crew_id.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    pub async fn start_execution(
        &self,
        crew: Crew,
        workspace_id: &str,
        owner_id: &str,
        inputs: Map<String, Value>,
    ) -> EngineResult<ExecutionStarted> {
        let ticket = self
            .start_execution_with_cancel(crew, workspace_id, owner_id, inputs, CancellationToken::new())
            .await?;
        Ok(ticket.started())
    }

    /// Start a run that also stops when `cancel` fires.
    ///
    /// The crew is stored first if it has not been saved yet, so that the
    /// execution can later be recovered. A crew whose id is already stored
    /// for another workspace or with different content runs as a fresh copy.
    pub async fn start_execution_with_cancel(
        &self,
        crew: Crew,
        workspace_id: &str,
        owner_id: &str,
        inputs: Map<String, Value>,
        cancel: CancellationToken,
    ) -> EngineResult<ExecutionTicket> {
        crew.validate()?;
        let crew = match self.store.get_crew(&crew.id).await? {
            Some(stored) if stored.workspace_id == workspace_id && stored.key() == crew.key() => {
                stored
            }
            Some(_) => {
                let mut copy = crew.scoped(workspace_id, owner_id);
                let original = std::mem::replace(&mut copy.id, Uuid::new_v4().to_string());
                log::info!(
                    "Crew id {} is taken by a different crew; running as {}",
                    original,
                    copy.id
                );
                self.store.save_crew(&copy).await?;
                copy
            }
            None => {
                let record = crew.scoped(workspace_id, owner_id);
                self.store.save_crew(&record).await?;
                record
            }
        };
        self.executor
            .start(crew, workspace_id, owner_id, inputs, cancel)
            .await
    }

    pub fn pause_execution(&self, execution_id: &str) -> bool {
        self.executor.pause(execution_id)
    }

    pub fn resume_execution(&self, execution_id: &str) -> bool {
        self.executor.resume(execution_id)
    }

    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        self.executor.cancel(execution_id)
    }

    /// Fetch an execution of `workspace_id`. Executions of other workspaces
    /// are reported as not found.
    pub async fn get_execution(&self, execution_id: &str, workspace_id: &str) -> EngineResult<Execution> {
        match self.store.get_execution(execution_id).await? {
            Some(execution) if execution.workspace_id == workspace_id => Ok(execution),
            _ => Err(EngineError::NotFound {
                kind: "execution",
                id: execution_id.to_string(),
            }),
        }
    }

    pub async fn list_executions(&self, filter: &ExecutionFilter) -> EngineResult<Vec<Execution>> {
        Ok(self.store.list_executions(filter).await?)
    }

    pub fn subscribe_progress(&self, execution_id: &str) -> BoxStream<'static, ProgressEvent> {
        subscribe_progress(
            self.store.clone(),
            &self.hub,
            execution_id,
            &self.config.progress,
        )
    }

    /// Re-attach a worker to a persisted, non-terminal execution using its
    /// stored crew.
    pub async fn recover_execution(&self, execution_id: &str) -> EngineResult<ExecutionStarted> {
        let execution = self.store.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::NotFound {
                kind: "execution",
                id: execution_id.to_string(),
            }
        })?;
        let crew = self.get_crew(&execution.crew_id).await?;
        let ticket = self
            .executor
            .recover(execution_id, crew, CancellationToken::new())
            .await?;
        Ok(ticket.started())
    }

    /// Recover every non-terminal execution without a live run. Returns the
    /// ids that were re-attached; failures are logged and skipped.
    pub async fn recover_interrupted(&self) -> EngineResult<Vec<String>> {
        let mut recovered = Vec::new();
        for execution in self.store.list_executions(&ExecutionFilter::default()).await? {
            if execution.is_terminal() || self.executor.runs().is_active(&execution.id) {
                continue;
            }
            match self.recover_execution(&execution.id).await {
                Ok(_) => recovered.push(execution.id),
                Err(e) => log::warn!("Could not recover execution {}: {}", execution.id, e),
            }
        }
        Ok(recovered)
    }

    // -----------------------------------------------------------------------
    // Tools
    // -----------------------------------------------------------------------

    pub fn list_tools(&self, workspace_id: &str) -> Vec<ToolDescriptor> {
        self.registry.list_tools(workspace_id)
    }

    pub fn register_custom_tool(
        &self,
        workspace_id: &str,
        spec: CustomToolSpec,
        handler: Arc<dyn ToolHandler>,
    ) -> EngineResult<ToolDescriptor> {
        self.registry.register_custom_tool(workspace_id, spec, handler)
    }

    /// Register a custom tool that forwards its input to `url`.
    pub fn register_webhook_tool(
        &self,
        workspace_id: &str,
        spec: CustomToolSpec,
        url: &str,
        headers: HashMap<String, String>,
    ) -> EngineResult<ToolDescriptor> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(EngineError::InvalidRequest(format!(
                "webhook url must be http(s): {}",
                url
            )));
        }
        let timeout = Duration::from_secs(self.config.executor.task_timeout_secs);
        let webhook = WebhookTool::new(url, timeout)
            .map_err(|e| EngineError::InvalidRequest(format!("webhook client: {}", e)))?
            .with_headers(headers);
        self.register_custom_tool(workspace_id, spec, Arc::new(webhook))
    }

    pub fn delete_custom_tool(&self, workspace_id: &str, tool_id: &str) -> EngineResult<()> {
        if self.registry.delete_custom_tool(workspace_id, tool_id) {
            Ok(())
        } else {
            Err(EngineError::NotFound {
                kind: "tool",
                id: tool_id.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    use crate::execution::{ExecutionStatus, ProgressEventKind};
    use crate::llms::ScriptedLLM;
    use crate::store::InMemoryExecutionStore;
    use crate::tools::FnTool;

    const INTENT: &str = r#"{"goalSummary": "Cold outreach", "requiredCapabilities": ["email"], "estimatedTaskCount": 1}"#;
    const CREW: &str = r#"{"name": "Outreach",
        "agents": [{"id": "a1", "name": "Eve", "role": "SDR", "goal": "Book meetings", "tools": ["email.cold_email"]}],
        "tasks": [{"id": "t1", "description": "Write the first email", "expectedOutput": "An email", "agent": "a1"}]}"#;

    fn service(replies: &[&str]) -> (CrewService, Arc<ScriptedLLM>, Arc<InMemoryExecutionStore>) {
        let llm = Arc::new(ScriptedLLM::new(replies.iter().map(|r| r.to_string()).collect()));
        let store = Arc::new(InMemoryExecutionStore::new());
        let mut config = EngineConfig::default();
        config.executor.retry_base_delay_ms = 0;
        config.progress.poll_interval_ms = 20;
        let service = CrewService::new(config, llm.clone(), store.clone());
        (service, llm, store)
    }

    #[tokio::test]
    async fn test_prompt_to_completed_execution() {
        let (service, llm, store) = service(&[INTENT, CREW, "Subject: Hello"]);

        let crew = service
            .generate_crew("Write cold emails for my SaaS", "ws-1", "user-1", vec![])
            .await
            .unwrap();
        let crew_id = service.save_crew(&crew, "ws-1", "user-1").await.unwrap();
        let stored = service.get_crew(&crew_id).await.unwrap();

        let ticket = service
            .start_execution_with_cancel(stored, "ws-1", "user-1", Map::new(), CancellationToken::new())
            .await
            .unwrap();
        let id = ticket.execution_id.clone();
        let events: Vec<ProgressEvent> = service.subscribe_progress(&id).collect().await;
        ticket.join().await.unwrap();

        assert_eq!(events.first().unwrap().kind, ProgressEventKind::Connected);
        let last = events.last().unwrap();
        assert_eq!(last.kind, ProgressEventKind::Complete);
        assert_eq!(last.task_results.as_ref().unwrap()["t1"], json!("Subject: Hello"));

        let execution = service.get_execution(&id, "ws-1").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(llm.call_count(), 3);
        assert_eq!(store.execution_count(), 1);

        let err = service.get_execution(&id, "ws-2").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_invalid_crew_rejected_before_any_write() {
        let (service, _, store) = service(&[]);
        let crew = Crew::new("empty", "", vec![], vec![]);
        let err = service
            .start_execution(crew, "ws-1", "user-1", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unsaved_crew_is_stored_on_start() {
        let (service, _, _) = service(&[]);
        let crew = crate::crew::tests::sample_crew();
        let crew_id = crew.id.clone();
        let started = service
            .start_execution(crew, "ws-1", "user-1", Map::new())
            .await
            .unwrap();
        assert_eq!(started.status, ExecutionStatus::Running);
        assert!(service.get_crew(&crew_id).await.is_ok());
        service.cancel_execution(&started.execution_id);
    }

    #[tokio::test]
    async fn test_colliding_crew_id_runs_as_fresh_copy() {
        let (service, _, _) = service(&[]);
        let saved = crate::crew::tests::sample_crew();
        service.save_crew(&saved, "ws-1", "user-1").await.unwrap();

        let mut other = crate::crew::tests::sample_crew();
        other.tasks.truncate(1);
        let started = service
            .start_execution(other.clone(), "ws-2", "user-2", Map::new())
            .await
            .unwrap();
        service.cancel_execution(&started.execution_id);

        let execution = service.get_execution(&started.execution_id, "ws-2").await.unwrap();
        assert_ne!(execution.crew_id, saved.id);
        let copy = service.get_crew(&execution.crew_id).await.unwrap();
        assert_eq!(copy.workspace_id, "ws-2");
        assert_eq!(copy.key(), other.key());

        let untouched = service.get_crew(&saved.id).await.unwrap();
        assert_eq!(untouched.workspace_id, "ws-1");
        assert_eq!(untouched.tasks.len(), 3);
    }

    #[tokio::test]
    async fn test_saved_crew_keeps_its_id_when_started() {
        let (service, _, _) = service(&[]);
        let crew = crate::crew::tests::sample_crew();
        service.save_crew(&crew, "ws-1", "user-1").await.unwrap();

        let started = service
            .start_execution(crew.clone(), "ws-1", "user-1", Map::new())
            .await
            .unwrap();
        service.cancel_execution(&started.execution_id);

        let execution = service.get_execution(&started.execution_id, "ws-1").await.unwrap();
        assert_eq!(execution.crew_id, crew.id);
    }

    #[tokio::test]
    async fn test_empty_registry_gains_general_tool() {
        let llm = Arc::new(ScriptedLLM::new(vec![]));
        let service = CrewService::with_registry(
            EngineConfig::default(),
            llm,
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(InMemoryToolRegistry::new()),
        );
        let ids: Vec<String> = service.list_tools("ws-1").into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![GENERAL_TOOL_ID.to_string()]);
    }

    #[tokio::test]
    async fn test_recover_unknown_execution() {
        let (service, _, _) = service(&[]);
        let err = service.recover_execution("nope").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_recover_interrupted_runs() {
        let (service, llm, store) = service(&[]);
        let crew = crate::crew::tests::sample_crew();
        store.save_crew(&crew).await.unwrap();
        let mut execution = Execution::new(&crew.id, "ws-1", "user-1", Map::new());
        store.create_execution(&execution).await.unwrap();
        execution.transition(ExecutionStatus::Running).unwrap();
        store.update_execution(&execution).await.unwrap();
        for _ in 0..3 {
            llm.push_reply("done");
        }

        let recovered = service.recover_interrupted().await.unwrap();
        assert_eq!(recovered, vec![execution.id.clone()]);

        let mut events = service.subscribe_progress(&execution.id);
        let mut last = None;
        while let Some(event) = events.next().await {
            last = Some(event);
        }
        assert_eq!(last.unwrap().kind, ProgressEventKind::Complete);
        assert!(service.recover_interrupted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_tool_management() {
        let (service, _, _) = service(&[]);
        let spec = CustomToolSpec {
            name: "CRM".into(),
            description: "Looks up contacts".into(),
            category: "leads".into(),
            input_schema: None,
        };
        let tool = service
            .register_custom_tool("ws-1", spec.clone(), Arc::new(FnTool::new("crm", |v| Ok(v))))
            .unwrap();
        assert!(service.list_tools("ws-1").iter().any(|t| t.id == tool.id));
        assert!(!service.list_tools("ws-2").iter().any(|t| t.id == tool.id));

        assert_eq!(
            service.delete_custom_tool("ws-2", &tool.id).unwrap_err().kind(),
            "not_found"
        );
        service.delete_custom_tool("ws-1", &tool.id).unwrap();

        let err = service
            .register_webhook_tool("ws-1", spec, "ftp://example.com", HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
}
