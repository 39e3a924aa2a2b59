//! Container execution backend, backed by the Docker Engine API

mod backend;
mod build;
mod power;

pub use backend::ContainerBackend;

use anyhow::{Context, Result};
use bollard::Docker;

/// Connect to the Docker daemon at the configured socket, used by both the
/// Host (preparation containers, artifact export) and the Runner (task
/// containers, environment sync).
pub fn connect(socket: &str) -> Result<Docker> {
    if let Some(path) = socket.strip_prefix("unix://") {
        Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION)
            .context("failed to connect to docker over unix socket")
    } else {
        Docker::connect_with_http_defaults().context("failed to connect to docker")
    }
}
