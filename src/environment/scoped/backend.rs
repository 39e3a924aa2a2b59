//! `ProcessBackend` implementation for the scoped-process backend
//!
//! Used when a task names the [`NO_CONTAINER`](crate::model::NO_CONTAINER)
//! sentinel environment. Launches the workload under a transient
//! `systemd-run --scope` unit with CPU/memory limits translated to
//! systemd's resource-control properties, optionally wrapped in `numactl`
//! for NUMA affinity. GPU requests are rejected (spec.md §4.3).

use std::process::Stdio;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::{Child, Command};
use tracing::info;

use crate::environment::traits::{
    BackendError, BackendResult, BackendStatus, LaunchSpec, ProcessBackend,
};
use crate::model::TaskPayload;

struct TrackedUnit {
    unit_name: String,
    child: Child,
}

pub struct ScopedProcessBackend {
    tracked: DashMap<u64, TrackedUnit>,
}

impl ScopedProcessBackend {
    pub fn new() -> Self {
        Self {
            tracked: DashMap::new(),
        }
    }
}

impl Default for ScopedProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessBackend for ScopedProcessBackend {
    async fn run(&self, spec: LaunchSpec) -> BackendResult<Option<u16>> {
        let task = &spec.task;
        if self.tracked.contains_key(&task.id) {
            return Err(BackendError::AlreadyTracked(task.id));
        }
        if !task.resources.gpu_ids.is_empty() {
            return Err(BackendError::Other(
                "scoped-process backend does not support GPU requests".to_string(),
            ));
        }
        let TaskPayload::Command(cmd) = &task.payload else {
            return Err(BackendError::Other(
                "scoped-process backend only supports command tasks".to_string(),
            ));
        };

        let mut args = vec![
            "--scope".to_string(),
            "--unit".to_string(),
            spec.unit_name.clone(),
            "-p".to_string(),
            format!("CPUQuota={}%", task.resources.cores * 100),
        ];
        if let Some(memory_bytes) = task.resources.memory_bytes {
            args.push("-p".to_string());
            args.push(format!("MemoryMax={memory_bytes}"));
        }

        if let Some(numa_id) = task.resources.numa_id {
            args.push("numactl".to_string());
            args.push(format!("--cpunodebind={numa_id}"));
            args.push(format!("--membind={numa_id}"));
        }
        args.push(cmd.executable.clone());
        args.extend(cmd.args.clone());

        let mut command = Command::new("systemd-run");
        command.args(&args).envs(&cmd.env).envs(&spec.env);

        command.stdout(stdio_for(spec.stdout_path.as_deref())?);
        command.stderr(stdio_for(spec.stderr_path.as_deref())?);
        command.stdin(Stdio::null());

        let child = command
            .spawn()
            .map_err(|e| BackendError::Unavailable(format!("failed to launch systemd-run: {e}")))?;

        self.tracked.insert(
            task.id,
            TrackedUnit {
                unit_name: spec.unit_name.clone(),
                child,
            },
        );
        info!(task_id = task.id, unit = %spec.unit_name, "scoped process started");
        Ok(None)
    }

    async fn pause(&self, task_id: u64) -> BackendResult<()> {
        let unit_name = self.unit_name_for(task_id)?;
        signal_unit(&unit_name, "SIGSTOP").await
    }

    async fn resume(&self, task_id: u64) -> BackendResult<()> {
        let unit_name = self.unit_name_for(task_id)?;
        signal_unit(&unit_name, "SIGCONT").await
    }

    async fn kill(&self, task_id: u64) -> BackendResult<()> {
        let unit_name = self.unit_name_for(task_id)?;
        signal_unit(&unit_name, "SIGKILL").await?;
        if let Some((_, mut tracked)) = self.tracked.remove(&task_id) {
            let _ = tracked.child.kill().await;
        }
        Ok(())
    }

    async fn status(&self, task_id: u64) -> BackendResult<Option<BackendStatus>> {
        let Some(mut tracked) = self.tracked.get_mut(&task_id) else {
            return Ok(None);
        };

        match tracked.child.try_wait() {
            Ok(Some(exit_status)) => {
                let oom = is_oom_exit(&exit_status, &tracked.unit_name).await;
                drop(tracked);
                self.tracked.remove(&task_id);
                if oom {
                    Ok(Some(BackendStatus::OomKilled))
                } else {
                    Ok(Some(BackendStatus::Exited(exit_status.code().unwrap_or(-1))))
                }
            }
            Ok(None) => Ok(Some(BackendStatus::Running)),
            Err(e) => Err(BackendError::Other(format!("wait failed: {e}"))),
        }
    }
}

impl ScopedProcessBackend {
    fn unit_name_for(&self, task_id: u64) -> BackendResult<String> {
        self.tracked
            .get(&task_id)
            .map(|r| r.unit_name.clone())
            .ok_or_else(|| BackendError::Other(format!("task {task_id} not tracked")))
    }
}

fn stdio_for(path: Option<&str>) -> BackendResult<Stdio> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::null()),
    }
}

async fn signal_unit(unit_name: &str, signal: &str) -> BackendResult<()> {
    let status = Command::new("systemctl")
        .args(["kill", &format!("--signal={signal}"), unit_name])
        .status()
        .await
        .map_err(|e| BackendError::Unavailable(format!("systemctl unavailable: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(BackendError::Other(format!(
            "systemctl kill --signal={signal} {unit_name} exited with {status}"
        )))
    }
}

/// The platform reports OOM via a specific signal/exit combination when the
/// cgroup's memory cap is exceeded; `systemd-run --scope` surfaces it as the
/// unit terminating with SIGKILL. We confirm by reading the unit's cgroup
/// `memory.events` file for a nonzero `oom_kill` counter rather than
/// trusting the signal alone, since an operator-issued SIGKILL looks
/// identical at the process level.
#[cfg(unix)]
async fn is_oom_exit(exit_status: &std::process::ExitStatus, unit_name: &str) -> bool {
    use std::os::unix::process::ExitStatusExt;
    if exit_status.signal() != Some(9) {
        return false;
    }

    let Ok(output) = Command::new("systemctl")
        .args(["show", "-p", "ControlGroup", "--value", unit_name])
        .output()
        .await
    else {
        return false;
    };
    let cgroup = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if cgroup.is_empty() {
        return false;
    }

    let events_path = format!("/sys/fs/cgroup{cgroup}/memory.events");
    let Ok(contents) = tokio::fs::read_to_string(&events_path).await else {
        return false;
    };
    contents
        .lines()
        .find_map(|line| line.strip_prefix("oom_kill "))
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|count| count > 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn is_oom_exit(_exit_status: &std::process::ExitStatus, _unit_name: &str) -> bool {
    false
}
