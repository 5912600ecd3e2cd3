//! In-process Execution Store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::crew::Crew;
use crate::errors::StoreError;
use crate::execution::types::Execution;
use crate::store::{ExecutionFilter, ExecutionStore};

/// HashMap-backed store. Counts writes so tests can assert that a rejected
/// operation touched nothing.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    crews: RwLock<HashMap<String, Crew>>,
    executions: RwLock<HashMap<String, Execution>>,
    writes: AtomicUsize,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful writes (crew saves, execution creates and updates).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored executions.
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save_crew(&self, crew: &Crew) -> Result<(), StoreError> {
        self.crews.write().insert(crew.id.clone(), crew.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_crew(&self, crew_id: &str) -> Result<Option<Crew>, StoreError> {
        Ok(self.crews.read().get(crew_id).cloned())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        if executions.contains_key(&execution.id) {
            return Err(StoreError::Backend(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        executions.insert(execution.id.clone(), execution.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        match executions.get_mut(&execution.id) {
            Some(slot) => {
                *slot = execution.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("execution {}", execution.id))),
        }
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.executions.read().get(execution_id).cloned())
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, StoreError> {
        let mut found: Vec<Execution> = self
            .executions
            .read()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::tests::sample_crew;
    use crate::execution::types::ExecutionStatus;
    use serde_json::Map;

    #[tokio::test]
    async fn test_crew_roundtrip_and_write_count() {
        let store = InMemoryExecutionStore::new();
        let crew = sample_crew();
        store.save_crew(&crew).await.unwrap();
        assert_eq!(store.get_crew(&crew.id).await.unwrap(), Some(crew));
        assert_eq!(store.get_crew("missing").await.unwrap(), None);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let store = InMemoryExecutionStore::new();
        let mut exec = Execution::new("c", "ws", "u", Map::new());
        assert!(matches!(
            store.update_execution(&exec).await,
            Err(StoreError::NotFound(_))
        ));
        store.create_execution(&exec).await.unwrap();
        assert!(store.create_execution(&exec).await.is_err());

        exec.transition(ExecutionStatus::Running).unwrap();
        store.update_execution(&exec).await.unwrap();
        let loaded = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = InMemoryExecutionStore::new();
        let a = Execution::new("c1", "ws-1", "u", Map::new());
        let b = Execution::new("c2", "ws-1", "u", Map::new());
        let c = Execution::new("c1", "ws-2", "u", Map::new());
        for e in [&a, &b, &c] {
            store.create_execution(e).await.unwrap();
        }
        let ws1 = store
            .list_executions(&ExecutionFilter::workspace("ws-1"))
            .await
            .unwrap();
        assert_eq!(ws1.len(), 2);

        let filter = ExecutionFilter {
            crew_id: Some("c1".into()),
            ..Default::default()
        };
        assert_eq!(store.list_executions(&filter).await.unwrap().len(), 2);
    }
}
