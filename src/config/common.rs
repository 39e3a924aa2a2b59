//! Configuration structures shared by the Host and Runner binaries

use std::path::PathBuf;

use serde::Deserialize;

/// Control-plane HTTP listener configuration, shared by both daemons.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    pub bind_port: u16,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_bind_host() -> String {
    "0.0.0.0".into()
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Shared-filesystem root used for environment artifacts, task logs, and the
/// default `/shared` bind mount (spec.md §6, "Filesystem layout").
#[derive(Debug, Clone, Deserialize)]
pub struct SharedStorageConfiguration {
    #[serde(default = "default_shared_root")]
    pub root: PathBuf,
}

impl SharedStorageConfiguration {
    pub fn environments_dir(&self) -> PathBuf {
        self.root.join("environments")
    }

    pub fn task_outputs_dir(&self) -> PathBuf {
        self.root.join("task_outputs")
    }

    pub fn task_errors_dir(&self) -> PathBuf {
        self.root.join("task_errors")
    }

    pub fn shared_data_dir(&self) -> PathBuf {
        self.root.join("shared_data")
    }

    /// Resolve relative paths against the config file's directory, and
    /// ensure every subdirectory used by the core exists.
    fn resolve_and_create(&mut self, base_dir: &std::path::Path) -> std::io::Result<()> {
        self.root = resolve_path(&self.root, base_dir);
        std::fs::create_dir_all(self.environments_dir())?;
        std::fs::create_dir_all(self.task_outputs_dir())?;
        std::fs::create_dir_all(self.task_errors_dir())?;
        std::fs::create_dir_all(self.shared_data_dir())?;
        Ok(())
    }
}

fn default_shared_root() -> PathBuf {
    PathBuf::from(".hakuriver/shared")
}

/// Docker Engine access configuration for the container backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfiguration {
    #[serde(default = "default_docker_socket")]
    pub socket: String,

    /// Base image tag pulled to bootstrap the default environment when no
    /// artifact yet exists for it (spec.md §4.2).
    pub default_base_image: String,

    #[serde(default = "default_container_pid_limit")]
    pub container_pid_limit: i64,
}

fn default_docker_socket() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let rootless = std::path::Path::new(&home).join(".docker/run/docker.sock");
        if rootless.exists() {
            return format!("unix://{}", rootless.display());
        }
    }
    "unix:///var/run/docker.sock".into()
}

fn default_container_pid_limit() -> i64 {
    512
}

/// Heartbeat/liveness timing, shared between the Coordinator's liveness
/// monitor and the Runner's heartbeat loop (spec.md §5, "Heartbeat period").
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfiguration {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_timeout_factor")]
    pub timeout_factor: u32,

    #[serde(default = "default_suspicion_threshold")]
    pub suspicion_threshold: u32,
}

impl HeartbeatConfiguration {
    pub fn liveness_window_secs(&self) -> u64 {
        self.interval_secs * self.timeout_factor as u64
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_timeout_factor() -> u32 {
    6
}

fn default_suspicion_threshold() -> u32 {
    3
}

impl Default for HeartbeatConfiguration {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_factor: default_timeout_factor(),
            suspicion_threshold: default_suspicion_threshold(),
        }
    }
}

/// Resolve a relative path against `base_dir`, normalizing `.`/`..`
/// components without requiring the path to exist yet.
pub(crate) fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let joined = base_dir.join(path);
    joined.canonicalize().unwrap_or_else(|_| normalize_path(&joined))
}

fn normalize_path(path: &std::path::Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                components.pop();
            }
            std::path::Component::CurDir => {}
            c => components.push(c),
        }
    }
    components.iter().collect()
}

pub(crate) fn base_dir_of(config_path: &std::path::Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

pub(crate) trait ResolvePaths {
    fn resolve_paths(&mut self, base_dir: &std::path::Path) -> std::io::Result<()>;
}

impl ResolvePaths for SharedStorageConfiguration {
    fn resolve_paths(&mut self, base_dir: &std::path::Path) -> std::io::Result<()> {
        self.resolve_and_create(base_dir)
    }
}
