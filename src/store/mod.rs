//! Persistent store: nodes and tasks survive a coordinator restart.

mod nodes;
mod tasks;

pub use nodes::NodeStore;
pub use tasks::TaskStore;

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Coordinator-side persistent state: node registry and task ledger.
pub struct Database {
    conn: Mutex<Connection>,
    pub nodes: NodeStore,
    pub tasks: TaskStore,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_tables(&conn)?;

        info!(path = %path.display(), "opened store");

        Ok(Self {
            conn: Mutex::new(conn),
            nodes: NodeStore::new(),
            tasks: TaskStore::new(),
        })
    }

    /// In-memory database, used by tests and `diagnostics` dry-runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            nodes: NodeStore::new(),
            tasks: TaskStore::new(),
        })
    }

    fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                hostname TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                total_cores INTEGER NOT NULL,
                total_memory_bytes INTEGER NOT NULL,
                numa TEXT NOT NULL,
                gpus TEXT NOT NULL,
                status TEXT NOT NULL,
                last_heartbeat INTEGER NOT NULL,
                cpu_used_percent REAL NOT NULL DEFAULT 0,
                memory_used_bytes INTEGER NOT NULL DEFAULT 0,
                metrics_reported_at INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                batch_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                cores INTEGER NOT NULL,
                memory_bytes INTEGER,
                gpu_ids TEXT NOT NULL,
                numa_id INTEGER,
                environment TEXT NOT NULL,
                privileged INTEGER NOT NULL DEFAULT 0,
                mounts TEXT NOT NULL,
                assigned_node TEXT,
                unit_name TEXT,
                stdout_path TEXT,
                stderr_path TEXT,
                exit_code INTEGER,
                error_message TEXT,
                status TEXT NOT NULL,
                submitted_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                tunnel_port INTEGER,
                assignment_suspicion INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_assigned_node ON tasks(assigned_node);
            CREATE INDEX IF NOT EXISTS idx_tasks_batch ON tasks(batch_id);
            "#,
        )
    }

    pub async fn nodes(&self) -> NodeStoreWithConn<'_> {
        NodeStoreWithConn {
            conn: self.conn.lock().await,
            store: &self.nodes,
        }
    }

    pub async fn tasks(&self) -> TaskStoreWithConn<'_> {
        TaskStoreWithConn {
            conn: self.conn.lock().await,
            store: &self.tasks,
        }
    }
}

pub struct NodeStoreWithConn<'a> {
    conn: tokio::sync::MutexGuard<'a, Connection>,
    store: &'a NodeStore,
}

impl<'a> NodeStoreWithConn<'a> {
    pub fn upsert(&self, node: &crate::model::Node) -> StoreResult<()> {
        self.store.upsert(&self.conn, node)
    }

    pub fn get(&self, hostname: &str) -> StoreResult<Option<crate::model::Node>> {
        self.store.get(&self.conn, hostname)
    }

    pub fn all(&self) -> StoreResult<Vec<crate::model::Node>> {
        self.store.all(&self.conn)
    }

    pub fn set_status(&self, hostname: &str, status: crate::model::NodeStatus) -> StoreResult<()> {
        self.store.set_status(&self.conn, hostname, status)
    }

    pub fn record_heartbeat(
        &self,
        hostname: &str,
        metrics: &crate::model::NodeMetrics,
        at: i64,
    ) -> StoreResult<()> {
        self.store.record_heartbeat(&self.conn, hostname, metrics, at)
    }
}

pub struct TaskStoreWithConn<'a> {
    conn: tokio::sync::MutexGuard<'a, Connection>,
    store: &'a TaskStore,
}

impl<'a> TaskStoreWithConn<'a> {
    pub fn insert(&self, task: &crate::model::Task) -> StoreResult<()> {
        self.store.insert(&self.conn, task)
    }

    pub fn get(&self, id: u64) -> StoreResult<Option<crate::model::Task>> {
        self.store.get(&self.conn, id)
    }

    pub fn update(&self, task: &crate::model::Task) -> StoreResult<()> {
        self.store.update(&self.conn, task)
    }

    pub fn list_by_status(
        &self,
        status: crate::model::TaskStatus,
    ) -> StoreResult<Vec<crate::model::Task>> {
        self.store.list_by_status(&self.conn, status)
    }

    pub fn list_by_assigned_node(&self, hostname: &str) -> StoreResult<Vec<crate::model::Task>> {
        self.store.list_by_assigned_node(&self.conn, hostname)
    }

    pub fn list_by_batch(&self, batch_id: u64) -> StoreResult<Vec<crate::model::Task>> {
        self.store.list_by_batch(&self.conn, batch_id)
    }

    pub fn list_all(&self) -> StoreResult<Vec<crate::model::Task>> {
        self.store.list_all(&self.conn)
    }
}
