//! Execution backend trait, shared by the container and scoped-process
//! backends (spec.md §4.3).

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{MountSpec, Task};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("task already tracked: {0}")]
    AlreadyTracked(u64),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Everything a backend needs to launch one task, flattened out of
/// [`Task`] plus resolved paths, so a backend never reaches back into the
/// store.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub task: Task,
    pub unit_name: String,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub shared_data_dir: String,
    pub local_temp_dir: String,
    pub extra_mounts: Vec<MountSpec>,
    pub env: HashMap<String, String>,
}

/// Outcome of a finished workload, synthesized by the self-check loop.
#[derive(Debug, Clone)]
pub struct ExitState {
    pub exit_code: Option<i32>,
    pub oom_killed: bool,
    pub error: Option<String>,
}

/// Live status of a tracked unit, as observed by the self-check loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Running,
    Paused,
    Exited(i32),
    OomKilled,
    Failed(String),
}

/// Uniform lifecycle interface over the two execution backends.
///
/// Generalizes the teacher's `ProcessEnvironment`, narrowed to the
/// operations the core actually drives: launch, pause/resume, kill, and
/// polling for completion. There is no attach/stdin surface because
/// command tasks stream straight to files and vps tasks are reached
/// through the tunnel proxy, not through this process's stdio.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Launch the task. Returns the dynamic host port mapped to the
    /// container's SSH port for vps tasks; `None` for command tasks.
    async fn run(&self, spec: LaunchSpec) -> BackendResult<Option<u16>>;

    async fn pause(&self, task_id: u64) -> BackendResult<()>;

    async fn resume(&self, task_id: u64) -> BackendResult<()>;

    async fn kill(&self, task_id: u64) -> BackendResult<()>;

    /// Poll for the current status of a tracked unit. `Ok(None)` means the
    /// backend has no record of this id (already reaped and reported, or
    /// never tracked).
    async fn status(&self, task_id: u64) -> BackendResult<Option<BackendStatus>>;
}
