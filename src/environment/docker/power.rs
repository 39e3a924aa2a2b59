//! Container lifecycle operations: start/stop/kill/pause/resume, and
//! dynamic port discovery for vps tasks.

use bollard::container::{
    KillContainerOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use tracing::{debug, info};

use crate::environment::traits::{BackendError, BackendResult, BackendStatus};

use super::build::SSH_CONTAINER_PORT;

pub async fn start(docker: &Docker, container_name: &str) -> BackendResult<()> {
    docker
        .start_container(container_name, None::<StartContainerOptions<String>>)
        .await?;
    info!(container = container_name, "started container");
    Ok(())
}

/// Discover the host port Docker chose for the container's SSH port. Must
/// be called after `start`; returns `None` if the container exposes no
/// such mapping (command tasks).
pub async fn discover_ssh_port(docker: &Docker, container_name: &str) -> BackendResult<Option<u16>> {
    let inspect = docker.inspect_container(container_name, None).await?;
    let Some(network_settings) = inspect.network_settings else {
        return Ok(None);
    };
    let Some(ports) = network_settings.ports else {
        return Ok(None);
    };
    let key = format!("{SSH_CONTAINER_PORT}/tcp");
    let Some(Some(bindings)) = ports.get(&key) else {
        return Ok(None);
    };
    let Some(binding) = bindings.first() else {
        return Ok(None);
    };
    let Some(host_port) = &binding.host_port else {
        return Ok(None);
    };
    host_port
        .parse::<u16>()
        .map(Some)
        .map_err(|e| BackendError::Other(format!("invalid host port {host_port}: {e}")))
}

pub async fn pause(docker: &Docker, container_name: &str) -> BackendResult<()> {
    docker.pause_container(container_name).await?;
    debug!(container = container_name, "paused container");
    Ok(())
}

pub async fn resume(docker: &Docker, container_name: &str) -> BackendResult<()> {
    docker.unpause_container(container_name).await?;
    debug!(container = container_name, "resumed container");
    Ok(())
}

pub async fn kill(docker: &Docker, container_name: &str) -> BackendResult<()> {
    match docker
        .kill_container(container_name, None::<KillContainerOptions<String>>)
        .await
    {
        Ok(_) => {}
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }) => {
            // Already stopped; fall through to removal.
        }
        Err(e) => return Err(BackendError::Docker(e)),
    }
    remove(docker, container_name).await
}

pub async fn stop_gracefully(docker: &Docker, container_name: &str, timeout_secs: i64) -> BackendResult<()> {
    let options = StopContainerOptions { t: timeout_secs };
    docker.stop_container(container_name, Some(options)).await?;
    remove(docker, container_name).await
}

async fn remove(docker: &Docker, container_name: &str) -> BackendResult<()> {
    let options = RemoveContainerOptions {
        force: true,
        v: false,
        ..Default::default()
    };
    match docker.remove_container(container_name, Some(options)).await {
        Ok(_) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
        Err(e) => Err(BackendError::Docker(e)),
    }
}

/// Translate a container's inspected state into a [`BackendStatus`],
/// detecting OOM from Docker's reported `oom_killed` flag (spec.md §4.3).
pub async fn inspect_status(docker: &Docker, container_name: &str) -> BackendResult<Option<BackendStatus>> {
    let inspect = match docker.inspect_container(container_name, None).await {
        Ok(inspect) => inspect,
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
            return Ok(None);
        }
        Err(e) => return Err(BackendError::Docker(e)),
    };

    let Some(state) = inspect.state else {
        return Ok(None);
    };

    if state.paused.unwrap_or(false) {
        return Ok(Some(BackendStatus::Paused));
    }
    if state.running.unwrap_or(false) {
        return Ok(Some(BackendStatus::Running));
    }
    if state.oom_killed.unwrap_or(false) {
        return Ok(Some(BackendStatus::OomKilled));
    }
    if let Some(exit_code) = state.exit_code {
        return Ok(Some(BackendStatus::Exited(exit_code as i32)));
    }
    if let Some(error) = state.error.filter(|e| !e.is_empty()) {
        return Ok(Some(BackendStatus::Failed(error)));
    }

    Ok(None)
}
