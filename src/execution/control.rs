//! Run controls: pause/resume, cancellation and the at-most-one-run guard.
//!
//! Every live run of an execution id holds a [`RunGuard`] obtained from the
//! shared [`RunRegistry`]. A second acquisition for the same id fails with
//! `AlreadyRunning` until the first guard is dropped.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::errors::EngineError;

/// Signals shared between a run and the operations that steer it.
///
/// Both signals are observed by the executor at task boundaries only.
#[derive(Debug)]
pub struct RunControl {
    execution_id: String,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

impl RunControl {
    pub fn new(execution_id: impl Into<String>, cancel: CancellationToken) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            execution_id: execution_id.into(),
            cancel,
            paused,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Request a pause at the next task boundary. Idempotent.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until resumed or cancelled. Returns immediately if not paused.
    pub async fn wait_while_paused(&self) {
        let mut rx = self.paused.subscribe();
        loop {
            if !*rx.borrow_and_update() || self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

/// Live runs keyed by execution id. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<String, Arc<RunControl>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single run slot for `execution_id`.
    pub fn try_acquire(
        &self,
        execution_id: &str,
        cancel: CancellationToken,
    ) -> Result<RunGuard, EngineError> {
        match self.runs.entry(execution_id.to_string()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyRunning {
                execution_id: execution_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let control = Arc::new(RunControl::new(execution_id, cancel));
                slot.insert(control.clone());
                Ok(RunGuard {
                    runs: self.runs.clone(),
                    control,
                })
            }
        }
    }

    pub fn get(&self, execution_id: &str) -> Option<Arc<RunControl>> {
        self.runs.get(execution_id).map(|r| r.value().clone())
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        self.runs.contains_key(execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.runs.len()
    }
}

/// Holds the run slot; releases it on drop.
#[derive(Debug)]
pub struct RunGuard {
    runs: Arc<DashMap<String, Arc<RunControl>>>,
    control: Arc<RunControl>,
}

impl RunGuard {
    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let control = self.control.clone();
        self.runs
            .remove_if(control.execution_id(), |_, live| Arc::ptr_eq(live, &control));
    }
}
