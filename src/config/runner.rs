//! Runner agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;

use super::common::{base_dir_of, ApiConfiguration, DockerConfiguration, HeartbeatConfiguration, ResolvePaths, SharedStorageConfiguration};

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfiguration {
    #[serde(default)]
    pub debug: bool,

    /// This node's hostname as presented to the Coordinator at registration.
    pub hostname: String,

    /// URL the Coordinator uses to reach this runner.
    pub advertise_url: String,

    pub api: ApiConfiguration,

    /// Coordinator base URL, e.g. `http://host0:9000`.
    pub coordinator_url: String,

    pub shared_storage: SharedStorageConfiguration,

    pub docker: DockerConfiguration,

    #[serde(default)]
    pub heartbeat: HeartbeatConfiguration,

    #[serde(default = "default_registration_retry")]
    pub registration: RegistrationConfiguration,

    /// Local scratch directory bind-mounted at `/local_temp` for container
    /// tasks (spec.md §4.3, "default bind mounts").
    #[serde(default = "default_local_temp_dir")]
    pub local_temp_dir: std::path::PathBuf,
}

fn default_local_temp_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(".hakuriver/local_temp")
}

/// Bounded-exponential-retry parameters for the startup registration call.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfiguration {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    10
}

fn default_registration_retry() -> RegistrationConfiguration {
    RegistrationConfiguration {
        base_delay_ms: default_base_delay_ms(),
        max_delay_ms: default_max_delay_ms(),
        max_retries: default_max_retries(),
    }
}

impl RunnerConfiguration {
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {path}"))?;

        let mut config: RunnerConfiguration =
            toml::from_str(&content).with_context(|| "failed to parse runner configuration")?;

        let base_dir = base_dir_of(config_path);
        config.shared_storage.resolve_paths(&base_dir)?;
        config.local_temp_dir = super::common::resolve_path(&config.local_temp_dir, &base_dir);
        std::fs::create_dir_all(&config.local_temp_dir)?;

        Ok(config)
    }
}
