//! Execution and Step records.
//!
//! An [`Execution`] is mutated only by the Crew Executor. Its `steps` list
//! is an append-only audit log: a retried task gets a new [`Step`], never a
//! rewritten one. `task_results` only gains entries through a succeeded
//! Step (see [`Execution::record_step`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::ExecutionFatalError;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle state of an Execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Edges of the executor state machine.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// Outcome of a single Step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Succeeded,
    Failed,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One recorded attempt of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// 1-based attempt number for this task.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Step {
    /// A new in-flight attempt.
    pub fn start(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        tool_id: Option<String>,
        attempt: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            tool_id,
            attempt,
            started_at: Utc::now(),
            ended_at: None,
            status: StepStatus::Running,
            output: None,
            error_message: None,
        }
    }

    pub fn succeed(mut self, output: Value) -> Self {
        self.status = StepStatus::Succeeded;
        self.output = Some(output);
        self.ended_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = StepStatus::Failed;
        self.error_message = Some(message.into());
        self.ended_at = Some(Utc::now());
        self
    }
}

// ---------------------------------------------------------------------------
// Failure detail
// ---------------------------------------------------------------------------

/// Marker for a cancelled execution, stored in [`ExecutionFailure::kind`].
pub const FAILURE_CANCELLED: &str = "cancelled";
/// A task exhausted its retry budget.
pub const FAILURE_TASK: &str = "task_failed";
/// An unexpected fault inside the executor.
pub const FAILURE_INTERNAL: &str = "internal";

/// Why an Execution ended `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ExecutionFailure {
    pub fn cancelled() -> Self {
        Self {
            kind: FAILURE_CANCELLED.to_string(),
            message: "Execution cancelled".to_string(),
            task_id: None,
        }
    }
}

impl From<&ExecutionFatalError> for ExecutionFailure {
    fn from(err: &ExecutionFatalError) -> Self {
        match err {
            ExecutionFatalError::RetryBudgetExhausted { task_id, .. } => Self {
                kind: FAILURE_TASK.to_string(),
                message: err.to_string(),
                task_id: Some(task_id.clone()),
            },
            ExecutionFatalError::Internal(_) => Self {
                kind: FAILURE_INTERNAL.to_string(),
                message: err.to_string(),
                task_id: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// Per-task view derived from `task_results` and `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "lowercase")]
pub enum TaskOutcome {
    Succeeded(Value),
    Failed(String),
    Pending,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// A single run of a crew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub crew_id: String,
    pub workspace_id: String,
    pub owner_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub task_results: BTreeMap<String, Value>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Derived convenience value; `task_results` is authoritative.
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ExecutionFailure>,
    #[serde(default)]
    pub cancelled: bool,
    /// The attempt currently in flight, if any.
    #[serde(default)]
    pub active_step: Option<Step>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// A fresh `pending` execution.
    pub fn new(
        crew_id: impl Into<String>,
        workspace_id: impl Into<String>,
        owner_id: impl Into<String>,
        inputs: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            crew_id: crew_id.into(),
            workspace_id: workspace_id.into(),
            owner_id: owner_id.into(),
            status: ExecutionStatus::Pending,
            steps: Vec::new(),
            task_results: BTreeMap::new(),
            inputs,
            result: None,
            error: None,
            cancelled: false,
            active_step: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    /// Move to `next`, stamping timestamps. Illegal edges are internal faults.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), ExecutionFatalError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionFatalError::Internal(format!(
                "illegal transition {} -> {} for execution {}",
                self.status, next, self.id
            )));
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
            self.active_step = None;
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Mark an attempt as in flight.
    pub fn begin_step(&mut self, step: Step) {
        self.active_step = Some(step);
        self.updated_at = Utc::now();
    }

    /// Append a finished Step and clear the in-flight marker.
    ///
    /// Only a succeeded Step writes into `task_results`.
    pub fn record_step(&mut self, step: Step) -> Result<(), ExecutionFatalError> {
        match step.status {
            StepStatus::Running => {
                return Err(ExecutionFatalError::Internal(format!(
                    "step {} recorded while still running",
                    step.id
                )))
            }
            StepStatus::Succeeded => {
                let output = step.output.clone().unwrap_or(Value::Null);
                self.task_results.insert(step.task_id.clone(), output);
            }
            StepStatus::Failed => {}
        }
        self.steps.push(step);
        self.active_step = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Number of recorded attempts for `task_id`.
    pub fn attempts_for(&self, task_id: &str) -> u32 {
        self.steps.iter().filter(|s| s.task_id == task_id).count() as u32
    }

    pub fn task_outcome(&self, task_id: &str) -> TaskOutcome {
        if let Some(output) = self.task_results.get(task_id) {
            return TaskOutcome::Succeeded(output.clone());
        }
        let failed_terminally = self
            .error
            .as_ref()
            .and_then(|e| e.task_id.as_deref())
            .map_or(false, |t| t == task_id);
        if failed_terminally {
            let message = self
                .steps
                .iter()
                .rev()
                .find(|s| s.task_id == task_id)
                .and_then(|s| s.error_message.clone())
                .unwrap_or_default();
            return TaskOutcome::Failed(message);
        }
        TaskOutcome::Pending
    }

    /// The last `n` Steps, oldest first.
    pub fn recent_steps(&self, n: usize) -> &[Step] {
        let start = self.steps.len().saturating_sub(n);
        &self.steps[start..]
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Returned by `startExecution`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStarted {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution() -> Execution {
        Execution::new("crew-1", "ws-1", "user-1", Map::new())
    }

    #[test]
    fn test_state_machine_edges() {
        use ExecutionStatus::*;
        let all = [Pending, Running, Paused, Completed, Failed];
        for from in all {
            for to in all {
                if from.is_terminal() {
                    assert!(!from.can_transition_to(to), "{} -> {}", from, to);
                }
            }
        }
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Completed));
    }

    #[test]
    fn test_transition_stamps_times() {
        let mut exec = execution();
        exec.transition(ExecutionStatus::Running).unwrap();
        assert!(exec.started_at.is_some());
        exec.transition(ExecutionStatus::Completed).unwrap();
        assert!(exec.ended_at.is_some());
        assert!(exec.transition(ExecutionStatus::Running).is_err());
    }

    #[test]
    fn test_only_succeeded_steps_write_results() {
        let mut exec = execution();
        exec.record_step(Step::start("t1", "a1", None, 1).fail("timeout"))
            .unwrap();
        assert!(exec.task_results.is_empty());
        exec.record_step(Step::start("t1", "a1", None, 2).succeed(json!("ok")))
            .unwrap();
        assert_eq!(exec.task_results["t1"], json!("ok"));
        assert_eq!(exec.attempts_for("t1"), 2);
        assert!(exec.record_step(Step::start("t2", "a1", None, 1)).is_err());
    }

    #[test]
    fn test_task_outcome_view() {
        let mut exec = execution();
        exec.record_step(Step::start("t1", "a1", None, 1).succeed(json!("r1")))
            .unwrap();
        exec.record_step(Step::start("t2", "a1", None, 1).fail("boom"))
            .unwrap();
        exec.error = Some(ExecutionFailure {
            kind: FAILURE_TASK.into(),
            message: "exhausted".into(),
            task_id: Some("t2".into()),
        });
        assert_eq!(exec.task_outcome("t1"), TaskOutcome::Succeeded(json!("r1")));
        assert_eq!(exec.task_outcome("t2"), TaskOutcome::Failed("boom".into()));
        assert_eq!(exec.task_outcome("t3"), TaskOutcome::Pending);
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("PAUSED".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Paused);
        assert!("stopped".parse::<ExecutionStatus>().is_err());
        assert_eq!(ExecutionStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_execution_wire_shape() {
        let exec = execution();
        let v = serde_json::to_value(&exec).unwrap();
        assert_eq!(v["status"], "pending");
        assert_eq!(v["crewId"], "crew-1");
        assert!(v["taskResults"].as_object().unwrap().is_empty());
        let back: Execution = serde_json::from_value(v).unwrap();
        assert_eq!(back, exec);
    }
}
