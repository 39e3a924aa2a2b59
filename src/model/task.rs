//! Task data model and the absorbing status FSM (spec.md §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Task kind. `Command` runs to completion and exits; `Vps` is a persistent,
/// interactive container reachable through the tunnel proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Command,
    Vps,
}

/// Absorbing status lifecycle, identical for both kinds (spec.md §3).
///
/// `pending -> assigning -> running <-> paused -> {completed|failed|killed|killed_oom}`
/// plus the orthogonal `* -> lost` transition. Terminal statuses are
/// absorbing: [`TaskStatus::is_terminal`] gates every write in the FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigning,
    Running,
    Paused,
    Completed,
    Failed,
    Killed,
    KilledOom,
    Lost,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Killed
                | TaskStatus::KilledOom
                | TaskStatus::Lost
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigning => "assigning",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Killed => "killed",
            TaskStatus::KilledOom => "killed_oom",
            TaskStatus::Lost => "lost",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource request attached to a task (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cores: u32,
    pub memory_bytes: Option<u64>,
    pub gpu_ids: Vec<String>,
    pub numa_id: Option<u32>,
}

/// Command-kind payload: executable + argv + environment map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPayload {
    pub executable: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Vps-kind payload: authorized public key material to inject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpsPayload {
    pub authorized_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskPayload {
    Command(CommandPayload),
    Vps(VpsPayload),
}

/// Sentinel environment name selecting the scoped-process backend.
pub const NO_CONTAINER: &str = "no-container";

/// An additional bind mount requested by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountSpec {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub batch_id: u64,
    pub kind: TaskKind,
    pub payload: TaskPayload,
    pub resources: ResourceRequest,
    /// Environment name, or [`NO_CONTAINER`] for the scoped-process backend.
    pub environment: String,
    pub privileged: bool,
    pub mounts: Vec<MountSpec>,
    pub assigned_node: Option<String>,
    pub unit_name: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub status: TaskStatus,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub tunnel_port: Option<u16>,
    pub assignment_suspicion: u32,
}

impl Task {
    pub fn is_no_container(&self) -> bool {
        self.environment == NO_CONTAINER
    }

    /// (I5) a command task's stdout/stderr paths are computable from its id
    /// alone, with no runner round-trip needed to serve logs.
    pub fn default_stdout_path(task_id: u64, task_outputs_dir: &str) -> String {
        format!("{}/{}.out", task_outputs_dir.trim_end_matches('/'), task_id)
    }

    pub fn default_stderr_path(task_id: u64, task_errors_dir: &str) -> String {
        format!("{}/{}.err", task_errors_dir.trim_end_matches('/'), task_id)
    }

    /// Attempt a transition, honoring FSM absorption (I6): once terminal, a
    /// task never accepts another write. Returns `false` on a no-op.
    pub fn try_transition(&mut self, new_status: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = new_status;
        true
    }
}

/// One placement target parsed from the submission grammar
/// `host | host:numaId | host::gpuId(,gpuId)*` (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub hostname: String,
    pub numa_id: Option<u32>,
    pub gpu_ids: Vec<String>,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if let Some((host, gpus)) = raw.split_once("::") {
            if host.is_empty() {
                return Err("empty hostname in target".to_string());
            }
            let gpu_ids: Vec<String> = gpus.split(',').map(|s| s.to_string()).collect();
            if gpu_ids.iter().any(|g| g.is_empty()) {
                return Err(format!("malformed gpu id list in target: {raw}"));
            }
            return Ok(Target {
                hostname: host.to_string(),
                numa_id: None,
                gpu_ids,
            });
        }

        if let Some((host, numa)) = raw.split_once(':') {
            if host.is_empty() {
                return Err("empty hostname in target".to_string());
            }
            let numa_id: u32 = numa
                .parse()
                .map_err(|_| format!("invalid numa id in target: {raw}"))?;
            return Ok(Target {
                hostname: host.to_string(),
                numa_id: Some(numa_id),
                gpu_ids: Vec::new(),
            });
        }

        if raw.is_empty() {
            return Err("empty target".to_string());
        }

        Ok(Target {
            hostname: raw.to_string(),
            numa_id: None,
            gpu_ids: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_grammar_host_only() {
        let t = Target::parse("alpha").unwrap();
        assert_eq!(t.hostname, "alpha");
        assert_eq!(t.numa_id, None);
        assert!(t.gpu_ids.is_empty());
    }

    #[test]
    fn target_grammar_host_numa() {
        let t = Target::parse("alpha:1").unwrap();
        assert_eq!(t.hostname, "alpha");
        assert_eq!(t.numa_id, Some(1));
    }

    #[test]
    fn target_grammar_host_gpus() {
        let t = Target::parse("alpha::0,1").unwrap();
        assert_eq!(t.hostname, "alpha");
        assert_eq!(t.gpu_ids, vec!["0".to_string(), "1".to_string()]);
    }

    #[test]
    fn terminal_status_absorbs_updates() {
        let mut task = sample_task();
        task.status = TaskStatus::Completed;
        assert!(!task.try_transition(TaskStatus::Running));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn non_terminal_status_accepts_update() {
        let mut task = sample_task();
        task.status = TaskStatus::Running;
        assert!(task.try_transition(TaskStatus::Paused));
        assert_eq!(task.status, TaskStatus::Paused);
    }

    fn sample_task() -> Task {
        Task {
            id: 1,
            batch_id: 1,
            kind: TaskKind::Command,
            payload: TaskPayload::Command(CommandPayload::default()),
            resources: ResourceRequest::default(),
            environment: "default".to_string(),
            privileged: false,
            mounts: Vec::new(),
            assigned_node: None,
            unit_name: None,
            stdout_path: None,
            stderr_path: None,
            exit_code: None,
            error_message: None,
            status: TaskStatus::Pending,
            submitted_at: 0,
            started_at: None,
            completed_at: None,
            tunnel_port: None,
            assignment_suspicion: 0,
        }
    }
}
