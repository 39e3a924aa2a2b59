//! Container configuration construction for the container backend

use std::collections::HashMap;

use bollard::container::Config;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding, RestartPolicy, RestartPolicyNameEnum};

use crate::environment::traits::LaunchSpec;
use crate::model::{TaskKind, TaskPayload};

pub const SSH_CONTAINER_PORT: u16 = 22;

/// Capabilities dropped from every container, mirroring a hardened default.
pub fn dropped_capabilities() -> Vec<String> {
    vec!["NET_RAW".to_string(), "SYS_ADMIN".to_string()]
}

/// Shell one-liner run as PID 1 for a VPS container: appends the given
/// public key to root's `authorized_keys` and execs `sshd -D` in its
/// place, so the container's lifetime is the sshd process's lifetime
/// (spec.md §4.3).
fn sshd_bootstrap_command(authorized_public_key: &str) -> String {
    format!(
        "mkdir -p /root/.ssh && chmod 700 /root/.ssh && echo '{key}' >> /root/.ssh/authorized_keys \
         && chmod 600 /root/.ssh/authorized_keys && exec /usr/sbin/sshd -D",
        key = authorized_public_key.replace('\'', "'\\''"),
    )
}

/// Build the bollard container configuration for one launch spec.
///
/// VPS tasks expose container port 22 mapped to an OS-chosen host port
/// (spec.md §4.3); command tasks expose nothing.
pub fn build_container_config(
    spec: &LaunchSpec,
    image: &str,
    pid_limit: i64,
) -> Config<String> {
    let task = &spec.task;

    let mut env_vars: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let (cmd, exposed_ports, port_bindings) = match &task.payload {
        TaskPayload::Command(cmd_payload) => {
            let mut argv = vec![cmd_payload.executable.clone()];
            argv.extend(cmd_payload.args.clone());
            for (k, v) in &cmd_payload.env {
                env_vars.push(format!("{k}={v}"));
            }
            (Some(argv), None, None)
        }
        TaskPayload::Vps(vps_payload) => {
            env_vars.push(format!(
                "HAKURIVER_AUTHORIZED_KEY={}",
                vps_payload.authorized_public_key
            ));
            let mut exposed = HashMap::new();
            exposed.insert(format!("{SSH_CONTAINER_PORT}/tcp"), HashMap::new());

            let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
            bindings.insert(
                format!("{SSH_CONTAINER_PORT}/tcp"),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: None, // OS-chosen port, discovered after start.
                }]),
            );
            let argv = vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                sshd_bootstrap_command(&vps_payload.authorized_public_key),
            ];
            (Some(argv), Some(exposed), Some(bindings))
        }
    };

    let mut mounts = vec![
        Mount {
            target: Some("/shared".to_string()),
            source: Some(spec.shared_data_dir.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        },
        Mount {
            target: Some("/local_temp".to_string()),
            source: Some(spec.local_temp_dir.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        },
    ];
    for mount in &spec.extra_mounts {
        mounts.push(Mount {
            target: Some(mount.container_path.clone()),
            source: Some(mount.host_path.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(mount.read_only),
            ..Default::default()
        });
    }

    let device_requests = if !task.resources.gpu_ids.is_empty() {
        Some(vec![bollard::models::DeviceRequest {
            driver: Some("nvidia".to_string()),
            device_ids: Some(task.resources.gpu_ids.clone()),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }])
    } else {
        None
    };

    let restart_policy = match task.kind {
        TaskKind::Vps => RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(5),
        },
        TaskKind::Command => RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            ..Default::default()
        },
    };

    let host_config = HostConfig {
        mounts: Some(mounts),
        exposed_ports: exposed_ports.clone(),
        port_bindings,
        cpu_count: Some(task.resources.cores as i64),
        memory: task.resources.memory_bytes.map(|b| b as i64),
        memory_swap: task.resources.memory_bytes.map(|b| b as i64),
        pids_limit: Some(pid_limit),
        device_requests,
        cap_drop: Some(dropped_capabilities()),
        privileged: Some(task.privileged),
        restart_policy: Some(restart_policy),
        ..Default::default()
    };

    Config {
        image: Some(image.to_string()),
        env: Some(env_vars),
        cmd,
        exposed_ports,
        host_config: Some(host_config),
        labels: Some(HashMap::from([(
            "hakuriver.task_id".to_string(),
            task.id.to_string(),
        )])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandPayload, ResourceRequest, Task, TaskStatus};

    fn sample_spec(kind: TaskKind) -> LaunchSpec {
        let payload = match kind {
            TaskKind::Command => TaskPayload::Command(CommandPayload {
                executable: "/bin/echo".to_string(),
                args: vec!["hi".to_string()],
                env: Default::default(),
            }),
            TaskKind::Vps => TaskPayload::Vps(crate::model::VpsPayload {
                authorized_public_key: "ssh-ed25519 AAAA".to_string(),
            }),
        };
        LaunchSpec {
            task: Task {
                id: 1,
                batch_id: 1,
                kind,
                payload,
                resources: ResourceRequest {
                    cores: 2,
                    memory_bytes: Some(1024 * 1024 * 1024),
                    gpu_ids: Vec::new(),
                    numa_id: None,
                },
                environment: "default".to_string(),
                privileged: false,
                mounts: Vec::new(),
                assigned_node: Some("alpha".to_string()),
                unit_name: None,
                stdout_path: None,
                stderr_path: None,
                exit_code: None,
                error_message: None,
                status: TaskStatus::Assigning,
                submitted_at: 0,
                started_at: None,
                completed_at: None,
                tunnel_port: None,
                assignment_suspicion: 0,
            },
            unit_name: "hakuriver-task-1".to_string(),
            stdout_path: Some("/shared/task_outputs/1.out".to_string()),
            stderr_path: Some("/shared/task_errors/1.err".to_string()),
            shared_data_dir: "/srv/shared/shared_data".to_string(),
            local_temp_dir: "/tmp/hakuriver".to_string(),
            extra_mounts: Vec::new(),
            env: Default::default(),
        }
    }

    #[test]
    fn vps_task_exposes_ssh_port_with_no_fixed_host_port() {
        let spec = sample_spec(TaskKind::Vps);
        let config = build_container_config(&spec, "env/default:base", 512);
        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("22/tcp"));

        let host_config = config.host_config.unwrap();
        let bindings = host_config.port_bindings.unwrap();
        let binding = &bindings["22/tcp"].as_ref().unwrap()[0];
        assert!(binding.host_port.is_none());
    }

    #[test]
    fn vps_task_launches_sshd_with_injected_key() {
        let spec = sample_spec(TaskKind::Vps);
        let config = build_container_config(&spec, "env/default:base", 512);
        let cmd = config.cmd.unwrap();
        assert_eq!(cmd[0], "/bin/sh");
        assert!(cmd[2].contains("ssh-ed25519 AAAA"));
        assert!(cmd[2].contains("authorized_keys"));
        assert!(cmd[2].contains("exec /usr/sbin/sshd -D"));
    }

    #[test]
    fn command_task_carries_argv_and_no_port_exposure() {
        let spec = sample_spec(TaskKind::Command);
        let config = build_container_config(&spec, "env/default:base", 512);
        assert_eq!(
            config.cmd,
            Some(vec!["/bin/echo".to_string(), "hi".to_string()])
        );
        assert!(config.exposed_ports.is_none());
    }

    #[test]
    fn resource_limits_map_onto_host_config() {
        let spec = sample_spec(TaskKind::Command);
        let host_config = build_container_config(&spec, "env/default:base", 512)
            .host_config
            .unwrap();
        assert_eq!(host_config.cpu_count, Some(2));
        assert_eq!(host_config.memory, Some(1024 * 1024 * 1024));
    }
}
