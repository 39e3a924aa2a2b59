//! Runner agent daemon command - registers with the Coordinator, starts
//! the control-plane server, and begins reporting heartbeats.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::api::HttpClient;
use crate::config::RunnerConfiguration;
use crate::environment::{connect_docker, ContainerBackend, EnvironmentSync, ScopedProcessBackend};
use crate::runner::{self, registration, spawn_heartbeat_loop, AppState, TaskTracker};
use crate::system::{detect, LockerRegistry, NoGpus};

pub async fn run(config_path: &str) -> Result<()> {
    info!("loading runner configuration from: {config_path}");
    let config = RunnerConfiguration::load(config_path)?;

    let inventory = detect(&NoGpus);
    info!(
        cores = inventory.total_cores,
        memory_bytes = inventory.total_memory_bytes,
        "detected local resources"
    );

    let coordinator_client = Arc::new(HttpClient::new(
        &config.coordinator_url,
        Duration::from_secs(config.api.request_timeout_secs),
    )?);

    registration::register_with_backoff(
        &coordinator_client,
        &config.hostname,
        &config.advertise_url,
        &inventory,
        &config.registration,
    )
    .await
    .context("failed to register with coordinator")?;

    let docker = connect_docker(&config.docker.socket)?;
    let sync = EnvironmentSync::new(docker.clone(), config.shared_storage.environments_dir());
    let container_backend = Arc::new(ContainerBackend::new(docker, sync, config.docker.container_pid_limit));
    let scoped_backend = Arc::new(ScopedProcessBackend::new());
    let tracker = Arc::new(TaskTracker::new(container_backend, scoped_backend));

    let state = AppState {
        tracker: tracker.clone(),
        task_lockers: Arc::new(LockerRegistry::new()),
        shared_data_dir: config.shared_storage.shared_data_dir().to_string_lossy().into_owned(),
        local_temp_dir: config.local_temp_dir.to_string_lossy().into_owned(),
    };
    let app = runner::build_router(state);

    let heartbeat_handle = spawn_heartbeat_loop(
        coordinator_client,
        tracker,
        config.hostname.clone(),
        config.heartbeat.clone(),
    );

    let bind_addr = format!("{}:{}", config.api.bind_host, config.api.bind_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind api listener on {bind_addr}"))?;
    info!(bind_addr, "runner control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("failed to install ctrl-c handler");
            }
            warn!("received shutdown signal, stopping runner daemon");
        })
        .await?;

    heartbeat_handle.stop();

    info!("runner daemon stopped");
    Ok(())
}
