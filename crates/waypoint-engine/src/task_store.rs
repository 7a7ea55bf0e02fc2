use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::TaskStore;
use waypoint_core::types::TaskInstance;

/// Persistent task store backed by SQLite.
///
/// Each task is stored whole as JSON, so its `SystemContext` comes back
/// exactly as it was handed off.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Open or create the task database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WaypointError::Database(format!("Failed to create task store directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| WaypointError::Database(format!("Failed to open task store: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .map_err(|e| WaypointError::Database(e.to_string()))?;

        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WaypointError::Database(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                 id TEXT PRIMARY KEY,
                 activity_id TEXT NOT NULL,
                 payload TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_tasks_activity
                 ON tasks(activity_id, created_at);",
        )
        .map_err(|e| WaypointError::Database(format!("Failed to initialize task schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, task: &TaskInstance) -> Result<Uuid> {
        let payload = serde_json::to_string(task)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| WaypointError::Persistence(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO tasks (id, activity_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                task.id.to_string(),
                task.activity_id,
                payload,
                task.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| WaypointError::Persistence(format!("Failed to save task: {}", e)))?;
        Ok(task.id)
    }

    fn select(&self, id: Uuid) -> Result<Option<TaskInstance>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WaypointError::Database(e.to_string()))?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| WaypointError::Database(format!("Failed to load task: {}", e)))?;

        payload
            .map(|json| serde_json::from_str(&json).map_err(WaypointError::from))
            .transpose()
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WaypointError::Database(e.to_string()))?;
        let deleted = conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
            .map_err(|e| WaypointError::Database(format!("Failed to delete task: {}", e)))?;
        Ok(deleted > 0)
    }

    /// Number of tasks still waiting for a callback.
    pub fn pending_count(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WaypointError::Database(e.to_string()))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .map_err(|e| WaypointError::Database(e.to_string()))?;
        Ok(count as usize)
    }
}

impl TaskStore for SqliteTaskStore {
    fn persist(&self, task: &TaskInstance) -> BoxFuture<'_, Result<Uuid>> {
        let result = self.insert(task);
        Box::pin(async move { result })
    }

    fn load(&self, id: Uuid) -> BoxFuture<'_, Result<Option<TaskInstance>>> {
        Box::pin(async move { self.select(id) })
    }

    fn remove(&self, id: Uuid) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { self.delete(id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use waypoint_core::types::{InvokeMode, ProcessRef, Request, StepResult, SystemContext};

    fn temp_store() -> (tempfile::TempDir, SqliteTaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::open(&dir.path().join("tasks.db")).unwrap();
        (dir, store)
    }

    fn task() -> TaskInstance {
        let mut ctx = SystemContext::new(InvokeMode::Async);
        ctx.set_parameter("topic", json!("rust"));
        ctx.save_inter_output("fetch", StepResult::success(json!({"n": 1})));
        TaskInstance {
            id: Uuid::new_v4(),
            request: Request::new(InvokeMode::Async),
            system_context: ctx,
            process_ref: Some(ProcessRef {
                run_id: "run-1".into(),
                node_id: "summarize".into(),
                frontier: vec!["notify".into()],
                visits: [("summarize".to_string(), 2)].into(),
            }),
            activity_id: "summarize".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let (_dir, store) = temp_store();
        let task = task();

        let id = store.persist(&task).await.unwrap();
        assert_eq!(id, task.id);

        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.system_context, task.system_context);
        assert_eq!(loaded.process_ref, task.process_ref);
        assert_eq!(loaded.activity_id, "summarize");
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = task();
        store.persist(&task).await.unwrap();

        assert!(store.remove(task.id).await.unwrap());
        assert!(!store.remove(task.id).await.unwrap());
        assert!(store.load(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}
