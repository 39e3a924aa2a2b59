//! Runner-side task tracking: remembers which backend holds which task
//! and periodically polls it for a terminal status to finalize (spec.md
//! §4.3, "self-check loop").

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::environment::{BackendResult, BackendStatus, ContainerBackend, LaunchSpec, ProcessBackend, ScopedProcessBackend};
use crate::model::{TaskKind, NO_CONTAINER};

/// A task this runner currently holds, tracked until it reaches a
/// terminal backend status.
#[derive(Debug, Clone)]
struct TrackedTask {
    kind: TaskKind,
    environment: String,
}

/// Outcome surfaced to the heartbeat loop once a tracked task finalizes.
#[derive(Debug, Clone)]
pub struct FinalizedOutcome {
    pub task_id: u64,
    pub status: crate::model::TaskStatus,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

/// Dispatches to the container or scoped-process backend depending on a
/// task's `environment` field, and tracks in-flight task ids so the
/// self-check loop knows what to poll.
pub struct TaskTracker {
    container_backend: Arc<ContainerBackend>,
    scoped_backend: Arc<ScopedProcessBackend>,
    tracked: DashMap<u64, TrackedTask>,
}

impl TaskTracker {
    pub fn new(container_backend: Arc<ContainerBackend>, scoped_backend: Arc<ScopedProcessBackend>) -> Self {
        Self {
            container_backend,
            scoped_backend,
            tracked: DashMap::new(),
        }
    }

    fn backend_for(&self, environment: &str) -> Arc<dyn ProcessBackend> {
        if environment == NO_CONTAINER {
            self.scoped_backend.clone()
        } else {
            self.container_backend.clone()
        }
    }

    pub fn record(&self, task_id: u64, kind: TaskKind, environment: String) {
        self.tracked.insert(task_id, TrackedTask { kind, environment });
    }

    /// Launch `spec` on the backend selected by its environment, and, on
    /// success, begin tracking it for the self-check loop.
    pub async fn run(&self, spec: LaunchSpec) -> BackendResult<Option<u16>> {
        let task_id = spec.task.id;
        let kind = spec.task.kind;
        let environment = spec.task.environment.clone();
        let backend = self.backend_for(&environment);
        let port = backend.run(spec).await?;
        self.record(task_id, kind, environment);
        Ok(port)
    }

    pub fn backend_for_task(&self, task_id: u64) -> Option<Arc<dyn ProcessBackend>> {
        self.tracked.get(&task_id).map(|t| self.backend_for(&t.environment))
    }

    pub fn running_ids(&self) -> Vec<u64> {
        self.tracked.iter().map(|e| *e.key()).collect()
    }

    pub fn forget(&self, task_id: u64) {
        self.tracked.remove(&task_id);
    }

    /// Poll every tracked task once; tasks that reached a terminal backend
    /// status are removed from tracking and returned for reporting.
    pub async fn poll_finalized(&self) -> Vec<FinalizedOutcome> {
        let snapshot: HashMap<u64, TrackedTask> =
            self.tracked.iter().map(|e| (*e.key(), e.value().clone())).collect();

        let mut finalized = Vec::new();
        for (task_id, tracked) in snapshot {
            let backend = self.backend_for(&tracked.environment);
            match backend.status(task_id).await {
                Ok(Some(BackendStatus::Running)) | Ok(Some(BackendStatus::Paused)) => {}
                Ok(Some(BackendStatus::Exited(code))) => {
                    let (status, reason) = if code == 0 {
                        (crate::model::TaskStatus::Completed, None)
                    } else {
                        (crate::model::TaskStatus::Failed, Some(format!("process exited with code {code}")))
                    };
                    finalized.push(FinalizedOutcome {
                        task_id,
                        status,
                        exit_code: Some(code),
                        reason,
                    });
                    self.tracked.remove(&task_id);
                }
                Ok(Some(BackendStatus::OomKilled)) => {
                    finalized.push(FinalizedOutcome {
                        task_id,
                        status: crate::model::TaskStatus::KilledOom,
                        exit_code: None,
                        reason: Some("killed by out-of-memory cgroup event".to_string()),
                    });
                    self.tracked.remove(&task_id);
                }
                Ok(Some(BackendStatus::Failed(reason))) => {
                    finalized.push(FinalizedOutcome {
                        task_id,
                        status: crate::model::TaskStatus::Failed,
                        exit_code: None,
                        reason: Some(reason),
                    });
                    self.tracked.remove(&task_id);
                }
                Ok(None) => {
                    info!(task_id, "tracked task no longer known to backend, dropping");
                    self.tracked.remove(&task_id);
                }
                Err(e) => {
                    warn!(task_id, error = %e, "self-check poll failed");
                }
            }
        }
        finalized
    }
}
