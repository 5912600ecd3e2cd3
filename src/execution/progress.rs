//! Progress Stream.
//!
//! Delivery is push-first: the executor publishes an [`ExecutionChanged`]
//! notification on the [`ProgressHub`] after every persisted transition.
//! A subscriber wakes on a notification for its execution, on the poll
//! interval (fallback for lagged notifications or writers in another
//! process) or on the heartbeat interval. Whatever woke it, the stream
//! re-reads the Execution from the store and diffs it against what it
//! has already sent, so the store stays the single source of truth.
//!
//! A stream always starts from the current snapshot (`connected`), never
//! replays history, and always ends with `complete` or `error`. Dropping it
//! stops all store reads.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::ProgressConfig;
use crate::execution::types::{Execution, ExecutionStatus, Step};
use crate::store::ExecutionStore;

/// Steps included in the `connected` snapshot.
const SNAPSHOT_STEPS: usize = 5;

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Notification that an execution record was rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionChanged {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

/// In-process fan-out of [`ExecutionChanged`] notifications.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<ExecutionChanged>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, execution_id: &str, status: ExecutionStatus) {
        let _ = self.tx.send(ExecutionChanged {
            execution_id: execution_id.to_string(),
            status,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionChanged> {
        self.tx.subscribe()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressEventKind {
    Connected,
    Update,
    Heartbeat,
    Complete,
    Error,
}

impl ProgressEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventKind::Connected => "connected",
            ProgressEventKind::Update => "update",
            ProgressEventKind::Heartbeat => "heartbeat",
            ProgressEventKind::Complete => "complete",
            ProgressEventKind::Error => "error",
        }
    }
}

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_results: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    fn new(kind: ProgressEventKind) -> Self {
        Self {
            kind,
            status: None,
            steps: None,
            task_results: None,
            message: None,
        }
    }

    fn connected(execution: &Execution) -> Self {
        Self {
            status: Some(execution.status),
            steps: Some(execution.recent_steps(SNAPSHOT_STEPS).to_vec()),
            ..Self::new(ProgressEventKind::Connected)
        }
    }

    fn update(status: ExecutionStatus, step: Option<Step>) -> Self {
        Self {
            status: Some(status),
            steps: step.map(|s| vec![s]),
            ..Self::new(ProgressEventKind::Update)
        }
    }

    fn heartbeat() -> Self {
        Self::new(ProgressEventKind::Heartbeat)
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(ProgressEventKind::Error)
        }
    }

    /// Closing event for a terminal execution.
    fn terminal(execution: &Execution) -> Self {
        match execution.status {
            ExecutionStatus::Completed => Self {
                status: Some(execution.status),
                task_results: Some(execution.task_results.clone()),
                ..Self::new(ProgressEventKind::Complete)
            },
            _ => Self {
                status: Some(execution.status),
                task_results: Some(execution.task_results.clone()),
                message: Some(
                    execution
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "Execution failed".to_string()),
                ),
                ..Self::new(ProgressEventKind::Error)
            },
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, ProgressEventKind::Complete | ProgressEventKind::Error)
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Streaming,
    Done,
}

enum Wake {
    /// Carries the status the writer announced, when known.
    Changed(Option<ExecutionStatus>),
    Poll,
    Heartbeat,
}

enum Signal {
    Received(Result<ExecutionChanged, broadcast::error::RecvError>),
    Poll,
    Heartbeat,
}

struct StreamState {
    store: Arc<dyn ExecutionStore>,
    changes: Option<broadcast::Receiver<ExecutionChanged>>,
    execution_id: String,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    phase: Phase,
    sent_steps: usize,
    last_status: Option<ExecutionStatus>,
    last_emit: Instant,
    queue: VecDeque<ProgressEvent>,
}

async fn read_execution(
    store: &dyn ExecutionStore,
    execution_id: &str,
) -> Result<Execution, String> {
    match store.get_execution(execution_id).await {
        Ok(Some(execution)) => Ok(execution),
        Ok(None) => Err(format!("Execution '{}' not found", execution_id)),
        Err(e) => Err(format!("Failed to read execution: {}", e)),
    }
}

impl StreamState {
    /// Wait for the next reason to look at the store.
    async fn wait(&mut self) -> Wake {
        let heartbeat_at = self.last_emit + self.heartbeat_interval;
        let poll = tokio::time::sleep(self.poll_interval);
        tokio::pin!(poll);
        loop {
            let signal = {
                let changes = &mut self.changes;
                let received = async {
                    match changes.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    r = received => Signal::Received(r),
                    _ = &mut poll => Signal::Poll,
                    _ = tokio::time::sleep_until(heartbeat_at) => Signal::Heartbeat,
                }
            };
            match signal {
                Signal::Received(Ok(change)) => {
                    if change.execution_id == self.execution_id {
                        return Wake::Changed(Some(change.status));
                    }
                }
                Signal::Received(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    log::debug!(
                        "Progress stream for {} lagged by {} notifications",
                        self.execution_id,
                        skipped
                    );
                    return Wake::Changed(None);
                }
                Signal::Received(Err(broadcast::error::RecvError::Closed)) => {
                    self.changes = None;
                }
                Signal::Poll => return Wake::Poll,
                Signal::Heartbeat => return Wake::Heartbeat,
            }
        }
    }

    /// Queue the events that describe `execution` relative to what was sent.
    fn diff(&mut self, execution: &Execution) {
        let new_steps = execution.steps.iter().skip(self.sent_steps);
        let mut emitted = false;
        for step in new_steps {
            self.queue
                .push_back(ProgressEvent::update(execution.status, Some(step.clone())));
            emitted = true;
        }
        self.sent_steps = execution.steps.len();

        if execution.is_terminal() {
            self.queue.push_back(ProgressEvent::terminal(execution));
            self.phase = Phase::Done;
        } else if !emitted && self.last_status != Some(execution.status) {
            self.queue.push_back(ProgressEvent::update(execution.status, None));
        }
        self.last_status = Some(execution.status);
    }

    async fn next_event(mut self) -> Option<(ProgressEvent, Self)> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                self.last_emit = Instant::now();
                return Some((event, self));
            }
            match self.phase {
                Phase::Done => return None,
                Phase::Connecting => {
                    let snapshot = read_execution(self.store.as_ref(), &self.execution_id).await;
                    match snapshot {
                        Ok(execution) => {
                            self.queue.push_back(ProgressEvent::connected(&execution));
                            self.sent_steps = execution.steps.len();
                            self.last_status = Some(execution.status);
                            if execution.is_terminal() {
                                self.queue.push_back(ProgressEvent::terminal(&execution));
                                self.phase = Phase::Done;
                            } else {
                                self.phase = Phase::Streaming;
                            }
                        }
                        Err(message) => {
                            self.queue.push_back(ProgressEvent::error(message));
                            self.phase = Phase::Done;
                        }
                    }
                }
                Phase::Streaming => match self.wait().await {
                    Wake::Heartbeat => self.queue.push_back(ProgressEvent::heartbeat()),
                    wake @ (Wake::Changed(_) | Wake::Poll) => {
                        match read_execution(self.store.as_ref(), &self.execution_id).await {
                            Ok(execution) => {
                                self.diff(&execution);
                                // The writer ended the run but could not store it.
                                if let Wake::Changed(Some(status)) = wake {
                                    if status.is_terminal() && !execution.is_terminal() {
                                        self.queue.push_back(ProgressEvent::error(format!(
                                            "Execution ended {} but its final state was not persisted",
                                            status
                                        )));
                                        self.phase = Phase::Done;
                                    }
                                }
                            }
                            Err(message) => {
                                self.queue.push_back(ProgressEvent::error(message));
                                self.phase = Phase::Done;
                            }
                        }
                    }
                },
            }
        }
    }
}

/// Subscribe to progress for `execution_id`.
///
/// The returned stream is lazy: nothing is read until it is first polled.
pub fn subscribe_progress(
    store: Arc<dyn ExecutionStore>,
    hub: &ProgressHub,
    execution_id: impl Into<String>,
    config: &ProgressConfig,
) -> BoxStream<'static, ProgressEvent> {
    let state = StreamState {
        store,
        changes: Some(hub.subscribe()),
        execution_id: execution_id.into(),
        poll_interval: config.poll_interval(),
        heartbeat_interval: config.heartbeat_interval(),
        phase: Phase::Connecting,
        sent_steps: 0,
        last_status: None,
        last_emit: Instant::now(),
        queue: VecDeque::new(),
    };
    stream::unfold(state, |state| state.next_event()).boxed()
}
