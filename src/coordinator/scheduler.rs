//! Task scheduler: validate -> resource-check -> mutual-exclusion ->
//! auto-select -> dispatch (spec.md §4.4)

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::api::types::{
    ControlRequest, RunRequest, SubmitRequest, SubmitResponse, SubmitResultItem, SubmitTarget,
};
use crate::api::types::{FailureEnvelope, FailureKind};
use crate::model::{
    IdGenerator, Node, NodeStatus, ResourceRequest, Task, TaskKind, TaskPayload, TaskStatus,
    NO_CONTAINER,
};
use crate::store::Database;

use super::dispatch::RunnerClientPool;
use super::errors::{CoordinatorError, CoordinatorResult};

pub struct Scheduler {
    db: Arc<Database>,
    dispatch: Arc<RunnerClientPool>,
    ids: Arc<IdGenerator>,
    task_outputs_dir: PathBuf,
    task_errors_dir: PathBuf,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        dispatch: Arc<RunnerClientPool>,
        ids: Arc<IdGenerator>,
        task_outputs_dir: PathBuf,
        task_errors_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            dispatch,
            ids,
            task_outputs_dir,
            task_errors_dir,
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> CoordinatorResult<SubmitResponse> {
        validate_submission_shape(&request)?;

        let targets = if request.kind == TaskKind::Vps && request.targets.is_empty() {
            vec![self.auto_select(&request).await?]
        } else {
            if request.targets.is_empty() {
                return Err(CoordinatorError::Validation(
                    "at least one target is required".to_string(),
                ));
            }
            request.targets.clone()
        };

        let batch_id = self.ids.next_id();
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            match self.process_target(&request, batch_id, &target).await {
                Ok(task_id) => results.push(SubmitResultItem {
                    task_id: Some(task_id),
                    target,
                    error: None,
                }),
                Err(envelope) => results.push(SubmitResultItem {
                    task_id: None,
                    target,
                    error: Some(envelope),
                }),
            }
        }

        Ok(SubmitResponse { batch_id, results })
    }

    async fn process_target(
        &self,
        request: &SubmitRequest,
        batch_id: u64,
        target: &SubmitTarget,
    ) -> Result<u64, FailureEnvelope> {
        let node = self.validate_target(request, target).await?;
        self.check_resources(request, target, &node).await?;

        let now = Utc::now().timestamp();
        let task_id = self.ids.next_id();
        let unit_name = format!("hakuriver-task-{task_id}");

        let payload = match request.kind {
            TaskKind::Command => TaskPayload::Command(request.command.clone().unwrap_or_default()),
            TaskKind::Vps => TaskPayload::Vps(request.vps.clone().unwrap_or_default()),
        };

        let (stdout_path, stderr_path) = match request.kind {
            TaskKind::Command => (
                Some(Task::default_stdout_path(
                    task_id,
                    &self.task_outputs_dir.to_string_lossy(),
                )),
                Some(Task::default_stderr_path(
                    task_id,
                    &self.task_errors_dir.to_string_lossy(),
                )),
            ),
            TaskKind::Vps => (None, None),
        };

        let mut task = Task {
            id: task_id,
            batch_id,
            kind: request.kind,
            payload,
            resources: ResourceRequest {
                cores: request.cores,
                memory_bytes: request.memory_bytes,
                gpu_ids: target.gpu_ids.clone(),
                numa_id: target.numa_id,
            },
            environment: request.environment.clone(),
            privileged: request.privileged,
            mounts: request.mounts.clone(),
            assigned_node: Some(target.hostname.clone()),
            unit_name: Some(unit_name.clone()),
            stdout_path,
            stderr_path,
            exit_code: None,
            error_message: None,
            status: TaskStatus::Assigning,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            tunnel_port: None,
            assignment_suspicion: 0,
        };

        self.db
            .tasks()
            .await
            .insert(&task)
            .map_err(|e| FailureEnvelope {
                kind: FailureKind::Backend,
                reason: e.to_string(),
            })?;

        let run_request = RunRequest {
            task_id: task.id,
            batch_id: task.batch_id,
            kind: task.kind,
            command: match &task.payload {
                TaskPayload::Command(c) => Some(c.clone()),
                _ => None,
            },
            vps: match &task.payload {
                TaskPayload::Vps(v) => Some(v.clone()),
                _ => None,
            },
            cores: task.resources.cores,
            memory_bytes: task.resources.memory_bytes,
            gpu_ids: task.resources.gpu_ids.clone(),
            numa_id: task.resources.numa_id,
            environment: task.environment.clone(),
            privileged: task.privileged,
            mounts: task.mounts.clone(),
            unit_name: unit_name.clone(),
            stdout_path: task.stdout_path.clone(),
            stderr_path: task.stderr_path.clone(),
        };

        match self.dispatch.run(&node.url, &run_request).await {
            Ok(response) => {
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
                task.tunnel_port = response.tunnel_port;
                if let Err(e) = self.db.tasks().await.update(&task) {
                    warn!(task_id = task.id, error = %e, "failed to persist post-dispatch update");
                }
                info!(task_id = task.id, node = %node.hostname, "dispatched task");
                Ok(task.id)
            }
            Err(e) => {
                task.try_transition(TaskStatus::Failed);
                task.error_message = Some(format!("dispatch failed: {e}"));
                task.completed_at = Some(now);
                if let Err(store_err) = self.db.tasks().await.update(&task) {
                    warn!(task_id = task.id, error = %store_err, "failed to persist dispatch failure");
                }
                Err(FailureEnvelope {
                    kind: FailureKind::Dispatch,
                    reason: format!("dispatch failed: {e}"),
                })
            }
        }
    }

    async fn validate_target(
        &self,
        request: &SubmitRequest,
        target: &SubmitTarget,
    ) -> Result<Node, FailureEnvelope> {
        let node = self
            .db
            .nodes()
            .await
            .get(&target.hostname)
            .map_err(|e| FailureEnvelope {
                kind: FailureKind::Backend,
                reason: e.to_string(),
            })?
            .ok_or_else(|| FailureEnvelope {
                kind: FailureKind::Validation,
                reason: format!("unknown hostname: {}", target.hostname),
            })?;

        if node.status != NodeStatus::Online {
            return Err(FailureEnvelope {
                kind: FailureKind::Validation,
                reason: format!("node {} is offline", target.hostname),
            });
        }
        if let Some(numa_id) = target.numa_id {
            if !node.owns_numa(numa_id) {
                return Err(FailureEnvelope {
                    kind: FailureKind::Validation,
                    reason: format!("node {} has no numa node {}", target.hostname, numa_id),
                });
            }
        }
        if !node.owns_gpus(&target.gpu_ids) {
            return Err(FailureEnvelope {
                kind: FailureKind::Validation,
                reason: format!("node {} does not own every requested gpu", target.hostname),
            });
        }
        if request.environment == NO_CONTAINER && !target.gpu_ids.is_empty() {
            return Err(FailureEnvelope {
                kind: FailureKind::Validation,
                reason: "no-container is incompatible with a gpu request".to_string(),
            });
        }

        Ok(node)
    }

    async fn check_resources(
        &self,
        request: &SubmitRequest,
        target: &SubmitTarget,
        node: &Node,
    ) -> Result<(), FailureEnvelope> {
        let active = self
            .db
            .tasks()
            .await
            .list_by_assigned_node(&target.hostname)
            .map_err(|e| FailureEnvelope {
                kind: FailureKind::Backend,
                reason: e.to_string(),
            })?
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect::<Vec<_>>();

        let allocated_cores: u32 = active.iter().map(|t| t.resources.cores).sum();
        if node.total_cores.saturating_sub(allocated_cores) < request.cores {
            return Err(FailureEnvelope {
                kind: FailureKind::Capacity,
                reason: format!("node {} has insufficient free cores", target.hostname),
            });
        }

        if let Some(requested_bytes) = request.memory_bytes {
            let allocated_bytes: u64 = active.iter().filter_map(|t| t.resources.memory_bytes).sum();
            if node.total_memory_bytes.saturating_sub(allocated_bytes) < requested_bytes {
                return Err(FailureEnvelope {
                    kind: FailureKind::Capacity,
                    reason: format!("node {} has insufficient free memory", target.hostname),
                });
            }
        }

        if !target.gpu_ids.is_empty() {
            let held: std::collections::HashSet<&str> = active
                .iter()
                .flat_map(|t| t.resources.gpu_ids.iter().map(|s| s.as_str()))
                .collect();
            if target.gpu_ids.iter().any(|id| held.contains(id.as_str())) {
                return Err(FailureEnvelope {
                    kind: FailureKind::Capacity,
                    reason: format!("node {} has a requested gpu already in use", target.hostname),
                });
            }
        }

        Ok(())
    }

    /// Auto-select for a vps submission with no target: iterate online
    /// nodes in stable lexicographic order and pick the first whose free
    /// resources satisfy the request (CPU/memory/GPU-aware only; not
    /// NUMA-aware, per the decision recorded in DESIGN.md).
    async fn auto_select(&self, request: &SubmitRequest) -> CoordinatorResult<SubmitTarget> {
        let nodes = self.db.nodes().await.all()?;
        for node in nodes.iter().filter(|n| n.status == NodeStatus::Online) {
            let candidate = SubmitTarget {
                hostname: node.hostname.clone(),
                numa_id: None,
                gpu_ids: request.gpu_ids.clone(),
            };
            if self.validate_target(request, &candidate).await.is_err() {
                continue;
            }
            if self.check_resources(request, &candidate, node).await.is_err() {
                continue;
            }
            return Ok(candidate);
        }
        Err(CoordinatorError::Capacity(
            "no online node satisfies the vps resource request".to_string(),
        ))
    }
}

fn validate_submission_shape(request: &SubmitRequest) -> CoordinatorResult<()> {
    if request.kind == TaskKind::Vps {
        if request.environment == NO_CONTAINER {
            return Err(CoordinatorError::Validation(
                "vps tasks require a container environment".to_string(),
            ));
        }
        if request.targets.len() > 1 {
            return Err(CoordinatorError::Validation(
                "vps submissions accept at most one target".to_string(),
            ));
        }
    }
    if request.kind == TaskKind::Command && request.environment == NO_CONTAINER && !request.gpu_ids.is_empty() {
        return Err(CoordinatorError::Validation(
            "no-container is incompatible with a gpu request".to_string(),
        ));
    }
    Ok(())
}

/// Build the control-plane request used to relay a kill/pause/resume call
/// to the owning runner.
pub fn control_request_for(task: &Task) -> Option<ControlRequest> {
    Some(ControlRequest {
        task_id: task.id,
        unit_name: task.unit_name.clone()?,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{GpuDescriptor, NumaNode};
    use crate::store::Database;

    fn online_node(hostname: &str, cores: u32) -> Node {
        Node {
            hostname: hostname.to_string(),
            url: format!("http://{hostname}:9100"),
            total_cores: cores,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            numa: std::collections::HashMap::new(),
            gpus: Vec::new(),
            status: NodeStatus::Online,
            last_heartbeat: Utc::now().timestamp(),
            metrics: Default::default(),
        }
    }

    fn scheduler() -> (Scheduler, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatch = Arc::new(RunnerClientPool::new(Duration::from_secs(5)));
        let ids = Arc::new(IdGenerator::new(0));
        let scheduler = Scheduler::new(db.clone(), dispatch, ids, "/tmp/out".into(), "/tmp/err".into());
        (scheduler, db)
    }

    fn command_request(cores: u32, targets: Vec<SubmitTarget>) -> SubmitRequest {
        SubmitRequest {
            kind: TaskKind::Command,
            command: Some(crate::model::CommandPayload {
                executable: "/bin/true".to_string(),
                args: Vec::new(),
                env: std::collections::HashMap::new(),
            }),
            vps: None,
            cores,
            memory_bytes: None,
            gpu_ids: Vec::new(),
            environment: NO_CONTAINER.to_string(),
            privileged: false,
            mounts: Vec::new(),
            targets,
        }
    }

    #[tokio::test]
    async fn rejects_submission_with_no_targets() {
        let (scheduler, _db) = scheduler();
        let request = command_request(1, Vec::new());
        let err = scheduler.submit(request).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[tokio::test]
    async fn one_bad_target_does_not_affect_batch_siblings() {
        let (scheduler, db) = scheduler();
        db.nodes().await.upsert(&online_node("alpha", 4)).unwrap();

        let request = command_request(
            1,
            vec![
                SubmitTarget {
                    hostname: "alpha".to_string(),
                    numa_id: None,
                    gpu_ids: Vec::new(),
                },
                SubmitTarget {
                    hostname: "unknown-host".to_string(),
                    numa_id: None,
                    gpu_ids: Vec::new(),
                },
            ],
        );

        // alpha's target will fail at dispatch (no runner listening), but
        // should still produce a distinct failed task row; unknown-host
        // should fail validation before ever reaching the store.
        let response = scheduler.submit(request).await.unwrap();
        assert_eq!(response.results.len(), 2);
        assert!(response.results[0].error.is_some() || response.results[0].task_id.is_some());
        assert_eq!(
            response.results[1].error.as_ref().unwrap().kind,
            FailureKind::Validation
        );
    }

    #[tokio::test]
    async fn vps_requires_exactly_one_target() {
        let (scheduler, db) = scheduler();
        db.nodes().await.upsert(&online_node("alpha", 4)).unwrap();
        db.nodes().await.upsert(&online_node("beta", 4)).unwrap();

        let request = SubmitRequest {
            kind: TaskKind::Vps,
            command: None,
            vps: Some(Default::default()),
            cores: 1,
            memory_bytes: None,
            gpu_ids: Vec::new(),
            environment: "default".to_string(),
            privileged: false,
            mounts: Vec::new(),
            targets: vec![
                SubmitTarget { hostname: "alpha".to_string(), numa_id: None, gpu_ids: Vec::new() },
                SubmitTarget { hostname: "beta".to_string(), numa_id: None, gpu_ids: Vec::new() },
            ],
        };

        let err = scheduler.submit(request).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[tokio::test]
    async fn no_container_rejects_gpu_request() {
        let request = command_request(
            1,
            vec![SubmitTarget {
                hostname: "alpha".to_string(),
                numa_id: None,
                gpu_ids: vec!["0".to_string()],
            }],
        );
        let mut with_gpu = request;
        with_gpu.gpu_ids = vec!["0".to_string()];

        let (scheduler, _db) = scheduler();
        let err = scheduler.submit(with_gpu).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[tokio::test]
    async fn auto_select_skips_node_without_enough_free_cores() {
        let (scheduler, db) = scheduler();
        db.nodes().await.upsert(&online_node("alpha", 1)).unwrap();
        db.nodes().await.upsert(&online_node("beta", 8)).unwrap();

        let request = SubmitRequest {
            kind: TaskKind::Vps,
            command: None,
            vps: Some(Default::default()),
            cores: 4,
            memory_bytes: None,
            gpu_ids: Vec::new(),
            environment: "default".to_string(),
            privileged: false,
            mounts: Vec::new(),
            targets: Vec::new(),
        };

        let target = scheduler.auto_select(&request).await.unwrap();
        assert_eq!(target.hostname, "beta");
    }

    #[tokio::test]
    async fn auto_select_fails_capacity_when_no_node_fits() {
        let (scheduler, db) = scheduler();
        db.nodes().await.upsert(&online_node("alpha", 1)).unwrap();

        let request = SubmitRequest {
            kind: TaskKind::Vps,
            command: None,
            vps: Some(Default::default()),
            cores: 4,
            memory_bytes: None,
            gpu_ids: Vec::new(),
            environment: "default".to_string(),
            privileged: false,
            mounts: Vec::new(),
            targets: Vec::new(),
        };

        let err = scheduler.auto_select(&request).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Capacity(_)));
    }

    #[test]
    fn owns_gpus_rejects_unknown_gpu() {
        let mut node = online_node("alpha", 4);
        node.gpus.push(GpuDescriptor {
            id: "0".to_string(),
            name: "gpu0".to_string(),
            driver: "nvidia".to_string(),
            memory_total_bytes: 0,
        });
        assert!(node.owns_gpus(&["0".to_string()]));
        assert!(!node.owns_gpus(&["1".to_string()]));
    }

    #[test]
    fn owns_numa_checks_membership() {
        let mut node = online_node("alpha", 4);
        node.numa.insert(0, NumaNode::default());
        assert!(node.owns_numa(0));
        assert!(!node.owns_numa(1));
    }
}
