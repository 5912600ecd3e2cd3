//! Crew Executor.
//!
//! A supervised state machine: `pending -> running -> {completed | failed}`
//! with `running <-> paused` as a side branch. One worker task per
//! execution walks the crew's task list in order, persisting the Execution
//! after every transition and publishing a change notification.
//!
//! Pause and cancellation are observed at task boundaries and before a
//! retry, never in the middle of an attempt.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::ExecutorConfig;
use crate::crew::Crew;
use crate::errors::{EngineError, EngineResult, ExecutionFatalError, ToolInvocationError};
use crate::execution::control::{RunControl, RunGuard, RunRegistry};
use crate::execution::progress::ProgressHub;
use crate::execution::types::{
    Execution, ExecutionFailure, ExecutionStarted, ExecutionStatus, Step, StepStatus,
};
use crate::llms::BaseLLM;
use crate::store::ExecutionStore;
use crate::task::Task;
use crate::tools::{PromptTool, ToolHandler, ToolRegistry};

/// Label used in step errors for tool-less reasoning calls.
const REASONING_LABEL: &str = "reasoning";

/// Extra attempts at writing the terminal record.
const TERMINAL_WRITE_RETRIES: u32 = 3;

/// How the task loop ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Cancelled,
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct ExecutionTicket {
    pub execution_id: String,
    pub status: ExecutionStatus,
    handle: JoinHandle<Execution>,
}

impl ExecutionTicket {
    pub fn started(&self) -> ExecutionStarted {
        ExecutionStarted {
            execution_id: self.execution_id.clone(),
            status: self.status,
        }
    }

    /// Wait for the worker and return the final Execution.
    pub async fn join(self) -> EngineResult<Execution> {
        self.handle
            .await
            .map_err(|e| ExecutionFatalError::Internal(format!("worker panicked: {}", e)).into())
    }
}

/// Runs crews. Cheap to clone; all state lives in the store and run registry.
#[derive(Clone)]
pub struct CrewExecutor {
    registry: Arc<dyn ToolRegistry>,
    store: Arc<dyn ExecutionStore>,
    llm: Arc<dyn BaseLLM>,
    hub: ProgressHub,
    runs: RunRegistry,
    config: ExecutorConfig,
}

impl std::fmt::Debug for CrewExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrewExecutor")
            .field("active_runs", &self.runs.active_count())
            .field("config", &self.config)
            .finish()
    }
}

impl CrewExecutor {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        store: Arc<dyn ExecutionStore>,
        llm: Arc<dyn BaseLLM>,
        hub: ProgressHub,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            llm,
            hub,
            runs: RunRegistry::new(),
            config,
        }
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Validate, persist a new Execution, move it to `running` and spawn the
    /// worker. An invalid crew is rejected before anything is written.
    pub async fn start(
        &self,
        crew: Crew,
        workspace_id: &str,
        owner_id: &str,
        inputs: Map<String, Value>,
        cancel: CancellationToken,
    ) -> EngineResult<ExecutionTicket> {
        crew.validate()?;

        let mut execution = Execution::new(&crew.id, workspace_id, owner_id, inputs);
        self.store.create_execution(&execution).await?;
        self.hub.publish(&execution.id, execution.status);
        log::info!(
            "Execution {} created for crew {} ({} tasks)",
            execution.id,
            crew.id,
            crew.tasks.len()
        );

        let guard = self.runs.try_acquire(&execution.id, cancel)?;
        execution.transition(ExecutionStatus::Running)?;
        self.persist(&execution).await?;
        log::info!("Execution {} running", execution.id);

        Ok(self.spawn(crew, execution, guard))
    }

    /// `start` and wait for the terminal Execution.
    pub async fn run_to_completion(
        &self,
        crew: Crew,
        workspace_id: &str,
        owner_id: &str,
        inputs: Map<String, Value>,
    ) -> EngineResult<Execution> {
        self.start(crew, workspace_id, owner_id, inputs, CancellationToken::new())
            .await?
            .join()
            .await
    }

    /// Re-attach a worker to a persisted, non-terminal Execution (e.g. after
    /// a restart). Tasks already present in `task_results` are skipped.
    pub async fn recover(
        &self,
        execution_id: &str,
        crew: Crew,
        cancel: CancellationToken,
    ) -> EngineResult<ExecutionTicket> {
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                kind: "execution",
                id: execution_id.to_string(),
            })?;
        if execution.is_terminal() {
            return Err(EngineError::ExecutionTerminal {
                execution_id: execution_id.to_string(),
                status: execution.status,
            });
        }
        if execution.crew_id != crew.id {
            return Err(EngineError::InvalidRequest(format!(
                "execution {} belongs to crew {}, not {}",
                execution_id, execution.crew_id, crew.id
            )));
        }
        crew.validate()?;

        let guard = self.runs.try_acquire(execution_id, cancel)?;

        if let Some(interrupted) = execution.active_step.take() {
            log::warn!(
                "Execution {}: attempt {} of task {} was interrupted",
                execution_id,
                interrupted.attempt,
                interrupted.task_id
            );
            execution.record_step(interrupted.fail("attempt interrupted before completion"))?;
        }
        match execution.status {
            ExecutionStatus::Pending => execution.transition(ExecutionStatus::Running)?,
            ExecutionStatus::Paused => guard.control().pause(),
            _ => {}
        }
        self.persist(&execution).await?;
        log::info!(
            "Execution {} recovered with {} of {} tasks done",
            execution_id,
            execution.task_results.len(),
            crew.tasks.len()
        );

        Ok(self.spawn(crew, execution, guard))
    }

    /// Request a pause at the next task boundary.
    ///
    /// Returns `false` when no live run holds `execution_id`.
    pub fn pause(&self, execution_id: &str) -> bool {
        match self.runs.get(execution_id) {
            Some(control) => {
                control.pause();
                log::info!("Execution {} pause requested", execution_id);
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, execution_id: &str) -> bool {
        match self.runs.get(execution_id) {
            Some(control) => {
                control.resume();
                log::info!("Execution {} resume requested", execution_id);
                true
            }
            None => false,
        }
    }

    /// Signal cancellation; the run stops at the next task boundary.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.runs.get(execution_id) {
            Some(control) => {
                control.cancel();
                log::info!("Execution {} cancellation requested", execution_id);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Worker
    // -----------------------------------------------------------------------

    fn spawn(&self, crew: Crew, execution: Execution, guard: RunGuard) -> ExecutionTicket {
        let execution_id = execution.id.clone();
        let status = execution.status;
        let executor = self.clone();
        let handle = tokio::spawn(async move { executor.drive(crew, execution, guard).await });
        ExecutionTicket {
            execution_id,
            status,
            handle,
        }
    }

    async fn drive(&self, crew: Crew, mut execution: Execution, guard: RunGuard) -> Execution {
        let control = guard.control().clone();
        let outcome = self.run_tasks(&crew, &mut execution, &control).await;

        let finished = match outcome {
            Ok(RunEnd::Completed) => {
                execution.result = Some(consolidated_result(&crew, &execution));
                execution.transition(ExecutionStatus::Completed)
            }
            Ok(RunEnd::Cancelled) => {
                execution.cancelled = true;
                execution.error = Some(ExecutionFailure::cancelled());
                execution.transition(ExecutionStatus::Failed)
            }
            Err(fatal) => {
                execution.error = Some(ExecutionFailure::from(&fatal));
                execution.transition(ExecutionStatus::Failed)
            }
        };
        if let Err(e) = finished {
            log::error!("Execution {}: {}", execution.id, e);
            execution.error = Some(ExecutionFailure::from(&e));
            execution.status = ExecutionStatus::Failed;
        }

        match execution.status {
            ExecutionStatus::Completed => log::info!("Execution {} completed", execution.id),
            _ if execution.cancelled => log::info!("Execution {} cancelled", execution.id),
            _ => log::error!(
                "Execution {} failed: {}",
                execution.id,
                execution
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error")
            ),
        }

        self.persist_terminal(&execution).await;
        drop(guard);
        execution
    }

    async fn run_tasks(
        &self,
        crew: &Crew,
        execution: &mut Execution,
        control: &RunControl,
    ) -> Result<RunEnd, ExecutionFatalError> {
        for task in &crew.tasks {
            if execution.task_results.contains_key(&task.id) {
                continue;
            }
            if self.task_boundary(execution, control).await? {
                return Ok(RunEnd::Cancelled);
            }

            let agent = crew.agent(&task.agent_id).ok_or_else(|| {
                ExecutionFatalError::Internal(format!(
                    "task {} references missing agent {}",
                    task.id, task.agent_id
                ))
            })?;
            let tool_id = self.resolve_tool(&execution.workspace_id, task, agent);
            let input = task_input(task, agent, execution);
            log::debug!(
                "Execution {}: task {} '{}' via {}",
                execution.id,
                task.id,
                task.summary(),
                tool_id.as_deref().unwrap_or(REASONING_LABEL)
            );

            loop {
                // Attempts recorded by an earlier worker count too.
                let failures = failed_attempts(execution, &task.id);
                if failures > self.config.retry_budget {
                    return Err(ExecutionFatalError::RetryBudgetExhausted {
                        task_id: task.id.clone(),
                        attempts: failures,
                        last_error: last_failure(execution, &task.id),
                    });
                }
                let attempt = execution.attempts_for(&task.id) + 1;
                let step = Step::start(&task.id, &agent.id, tool_id.clone(), attempt);
                execution.begin_step(step.clone());
                self.persist(execution).await?;

                match self
                    .invoke(&execution.workspace_id, tool_id.as_deref(), input.clone())
                    .await
                {
                    Ok(output) => {
                        execution.record_step(step.succeed(output))?;
                        self.persist(execution).await?;
                        log::info!(
                            "Execution {}: step for task {} succeeded (attempt {})",
                            execution.id,
                            task.id,
                            attempt
                        );
                        break;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        execution.record_step(step.fail(message.clone()))?;
                        self.persist(execution).await?;

                        let failures = failed_attempts(execution, &task.id);
                        if failures > self.config.retry_budget {
                            return Err(ExecutionFatalError::RetryBudgetExhausted {
                                task_id: task.id.clone(),
                                attempts: failures,
                                last_error: message,
                            });
                        }
                        let delay = self.config.retry_backoff(failures - 1);
                        log::warn!(
                            "Execution {}: task {} attempt {} failed ({}); retrying in {:?}",
                            execution.id,
                            task.id,
                            attempt,
                            message,
                            delay
                        );
                        if !delay.is_zero() {
                            let token = control.cancellation_token();
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = token.cancelled() => {}
                            }
                        }
                        if control.is_cancelled() {
                            return Ok(RunEnd::Cancelled);
                        }
                    }
                }
            }
        }
        Ok(RunEnd::Completed)
    }

    /// Honour pause and cancellation between tasks. Returns `true` when the
    /// run must stop as cancelled.
    async fn task_boundary(
        &self,
        execution: &mut Execution,
        control: &RunControl,
    ) -> Result<bool, ExecutionFatalError> {
        if control.is_cancelled() {
            return Ok(true);
        }
        if !control.is_paused() {
            return Ok(false);
        }

        if execution.status != ExecutionStatus::Paused {
            execution.transition(ExecutionStatus::Paused)?;
            self.persist(execution).await?;
        }
        log::info!("Execution {} paused", execution.id);
        control.wait_while_paused().await;
        if control.is_cancelled() {
            return Ok(true);
        }
        execution.transition(ExecutionStatus::Running)?;
        self.persist(execution).await?;
        log::info!("Execution {} resumed", execution.id);
        Ok(false)
    }

    /// Pick the capability for a task: its preferred tool if the agent may
    /// use it, else the agent's first visible tool, else a reasoning call.
    fn resolve_tool(&self, workspace_id: &str, task: &Task, agent: &Agent) -> Option<String> {
        let visible = |id: &str| self.registry.get_tool(workspace_id, id).is_some();
        if let Some(preferred) = &task.tool_id {
            if agent.can_use(preferred) && visible(preferred) {
                return Some(preferred.clone());
            }
            log::warn!(
                "Task {} prefers tool {} which agent {} cannot use",
                task.id,
                preferred,
                agent.id
            );
        }
        agent.tool_ids.iter().find(|id| visible(id)).cloned()
    }

    async fn invoke(
        &self,
        workspace_id: &str,
        tool_id: Option<&str>,
        input: Value,
    ) -> Result<Value, ToolInvocationError> {
        let label = tool_id.unwrap_or(REASONING_LABEL).to_string();
        let call = async {
            match tool_id {
                Some(id) => self.registry.invoke(workspace_id, id, input).await,
                None => PromptTool::new("task", "Complete the task directly.", self.llm.clone())
                    .invoke(input)
                    .await
                    .map_err(|e| ToolInvocationError::failed(REASONING_LABEL, e.to_string())),
            }
        };
        match tokio::time::timeout(self.config.task_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(ToolInvocationError::timeout(label, self.config.task_timeout_secs)),
        }
    }

    async fn persist(&self, execution: &Execution) -> Result<(), ExecutionFatalError> {
        self.store
            .update_execution(execution)
            .await
            .map_err(|e| ExecutionFatalError::Internal(format!("store write failed: {}", e)))?;
        self.hub.publish(&execution.id, execution.status);
        Ok(())
    }

    /// Write the terminal record, retrying with backoff. Subscribers are
    /// notified of the terminal status even when every write fails, so the
    /// progress stream can close with an `error` event.
    async fn persist_terminal(&self, execution: &Execution) {
        for attempt in 0..=TERMINAL_WRITE_RETRIES {
            match self.store.update_execution(execution).await {
                Ok(()) => {
                    self.hub.publish(&execution.id, execution.status);
                    return;
                }
                Err(e) if attempt < TERMINAL_WRITE_RETRIES => {
                    let delay = self.config.retry_backoff(attempt);
                    log::warn!(
                        "Execution {}: final state write failed ({}); retrying in {:?}",
                        execution.id,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    log::error!("Execution {}: final state not persisted: {}", execution.id, e);
                }
            }
        }
        self.hub.publish(&execution.id, execution.status);
    }
}

fn failed_attempts(execution: &Execution, task_id: &str) -> u32 {
    execution
        .steps
        .iter()
        .filter(|s| s.task_id == task_id && s.status == StepStatus::Failed)
        .count() as u32
}

fn last_failure(execution: &Execution, task_id: &str) -> String {
    execution
        .steps
        .iter()
        .rev()
        .find(|s| s.task_id == task_id && s.status == StepStatus::Failed)
        .and_then(|s| s.error_message.clone())
        .unwrap_or_default()
}

/// Tool input: task text, agent persona and the literal inputs merged with
/// the results of the task's dependencies (keyed by task id).
fn task_input(task: &Task, agent: &Agent, execution: &Execution) -> Value {
    let mut inputs = execution.inputs.clone();
    for dep in &task.depends_on {
        if let Some(result) = execution.task_results.get(dep) {
            inputs.insert(dep.clone(), result.clone());
        }
    }
    json!({
        "task": task.description,
        "expectedOutput": task.expected_output,
        "context": task.context,
        "agent": {
            "name": agent.name,
            "role": agent.role,
            "goal": agent.goal,
            "backstory": agent.backstory,
        },
        "inputs": inputs,
    })
}

/// Output of the single leaf task, or the whole result map when the crew
/// has several leaves.
fn consolidated_result(crew: &Crew, execution: &Execution) -> Value {
    let leaves = crew.leaf_task_ids();
    if let [leaf] = leaves.as_slice() {
        if let Some(output) = execution.task_results.get(*leaf) {
            return output.clone();
        }
    }
    json!(execution.task_results)
}
