//! Execution Store: durable keyed storage for Crew and Execution documents.
//!
//! The store is the single source of truth for execution state. Writes for
//! one execution id are last-write-wins; there is no cross-execution
//! contention. The core performs no authorization; callers pass already
//! scoped workspace ids.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crew::Crew;
use crate::errors::StoreError;
use crate::execution::types::{Execution, ExecutionStatus};

pub use memory::InMemoryExecutionStore;
pub use sqlite::SqliteExecutionStore;

/// Field filter for [`ExecutionStore::list_executions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFilter {
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub crew_id: Option<String>,
}

impl ExecutionFilter {
    pub fn workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: Some(workspace_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        self.workspace_id
            .as_ref()
            .map_or(true, |w| &execution.workspace_id == w)
            && self.status.map_or(true, |s| execution.status == s)
            && self.crew_id.as_ref().map_or(true, |c| &execution.crew_id == c)
    }
}

/// Storage backend for crews and executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a crew document. Overwrites any document with the same id.
    async fn save_crew(&self, crew: &Crew) -> Result<(), StoreError>;

    async fn get_crew(&self, crew_id: &str) -> Result<Option<Crew>, StoreError>;

    /// Insert a new execution. Fails if the id already exists.
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Replace an existing execution. Fails with `NotFound` if absent.
    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError>;

    /// Executions matching `filter`, newest first.
    async fn list_executions(&self, filter: &ExecutionFilter)
        -> Result<Vec<Execution>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_filter_matches_all_fields() {
        let exec = Execution::new("crew-1", "ws-1", "u", Map::new());
        assert!(ExecutionFilter::default().matches(&exec));
        assert!(ExecutionFilter::workspace("ws-1").matches(&exec));
        assert!(!ExecutionFilter::workspace("ws-2").matches(&exec));

        let filter = ExecutionFilter {
            workspace_id: Some("ws-1".into()),
            status: Some(ExecutionStatus::Running),
            crew_id: None,
        };
        assert!(!filter.matches(&exec));

        let filter = ExecutionFilter {
            crew_id: Some("crew-1".into()),
            status: Some(ExecutionStatus::Pending),
            ..Default::default()
        };
        assert!(filter.matches(&exec));
    }
}
