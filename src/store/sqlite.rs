//! SQLite-backed Execution Store.
//!
//! Crews and executions are stored as self-contained JSON documents; the
//! fields used for filtering are copied into indexed columns.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::crew::Crew;
use crate::errors::StoreError;
use crate::execution::types::Execution;
use crate::store::{ExecutionFilter, ExecutionStore};

#[derive(Debug, Clone)]
pub struct SqliteExecutionStore {
    /// Connection guarded by a mutex; all access goes through `spawn_blocking`.
    conn: Arc<Mutex<Connection>>,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteExecutionStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        log::info!("Opened SQLite execution store at {}", path.display());
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS crews (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_crews_workspace ON crews(workspace_id);
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                crew_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_workspace ON executions(workspace_id);
            CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
            CREATE INDEX IF NOT EXISTS idx_executions_crew ON executions(crew_id);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StoreError::Backend(format!("Failed to acquire database lock: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn save_crew(&self, crew: &Crew) -> Result<(), StoreError> {
        let doc = serde_json::to_string(crew)?;
        let crew = crew.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO crews (id, workspace_id, owner_id, created_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    crew.id,
                    crew.workspace_id,
                    crew.owner_id,
                    timestamp(&crew.created_at),
                    doc
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_crew(&self, crew_id: &str) -> Result<Option<Crew>, StoreError> {
        let crew_id = crew_id.to_string();
        let doc: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row("SELECT doc FROM crews WHERE id = ?1", params![crew_id], |row| {
                        row.get(0)
                    })
                    .optional()?)
            })
            .await?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let doc = serde_json::to_string(execution)?;
        let exec = execution.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO executions
                    (id, crew_id, workspace_id, owner_id, status, created_at, updated_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    exec.id,
                    exec.crew_id,
                    exec.workspace_id,
                    exec.owner_id,
                    exec.status.as_str(),
                    timestamp(&exec.created_at),
                    timestamp(&exec.updated_at),
                    doc
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let doc = serde_json::to_string(execution)?;
        let exec = execution.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE executions SET status = ?2, updated_at = ?3, doc = ?4 WHERE id = ?1",
                params![
                    exec.id,
                    exec.status.as_str(),
                    timestamp(&exec.updated_at),
                    doc
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("execution {}", exec.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let execution_id = execution_id.to_string();
        let doc: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT doc FROM executions WHERE id = ?1",
                        params![execution_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, StoreError> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(ws) = &filter.workspace_id {
            clauses.push("workspace_id = ?");
            values.push(ws.clone());
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(crew_id) = &filter.crew_id {
            clauses.push("crew_id = ?");
            values.push(crew_id.clone());
        }
        let mut sql = String::from("SELECT doc FROM executions");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");

        let docs: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get(0))?;
                let mut docs = Vec::new();
                for row in rows {
                    docs.push(row?);
                }
                Ok(docs)
            })
            .await?;

        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(StoreError::from))
            .collect()
    }
}
