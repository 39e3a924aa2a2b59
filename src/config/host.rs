//! Host (Coordinator) configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::common::{
    base_dir_of, ApiConfiguration, DockerConfiguration, HeartbeatConfiguration, ResolvePaths,
    SharedStorageConfiguration,
};

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfiguration {
    #[serde(default)]
    pub debug: bool,

    pub api: ApiConfiguration,

    pub shared_storage: SharedStorageConfiguration,

    /// Docker access used to manage environment preparation containers
    /// and bootstrap the default environment (spec.md §4.2, §4.4).
    pub docker: DockerConfiguration,

    #[serde(default)]
    pub heartbeat: HeartbeatConfiguration,

    pub proxy: ProxyConfiguration,

    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,

    /// Name of the environment bootstrapped at startup if absent.
    #[serde(default = "default_environment_name")]
    pub default_environment_name: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".hakuriver/host.db")
}

fn default_environment_name() -> String {
    "default".into()
}

/// Tunnel proxy listener — a separate TCP port from the HTTP API
/// (spec.md §4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfiguration {
    #[serde(default = "default_proxy_bind_host")]
    pub bind_host: String,

    pub bind_port: u16,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

fn default_proxy_bind_host() -> String {
    "0.0.0.0".into()
}

fn default_handshake_timeout_secs() -> u64 {
    5
}

fn default_dial_timeout_secs() -> u64 {
    5
}

impl HostConfiguration {
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {path}"))?;

        let mut config: HostConfiguration =
            toml::from_str(&content).with_context(|| "failed to parse host configuration")?;

        let base_dir = base_dir_of(config_path);
        config.shared_storage.resolve_paths(&base_dir)?;

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(config)
    }
}
