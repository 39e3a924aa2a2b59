//! Host (Coordinator) daemon command - starts the control-plane server,
//! the liveness monitor, and the tunnel proxy listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bollard::Docker;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::HostConfiguration;
use crate::coordinator::{self, spawn_liveness_monitor, AppState, PreparationManager, RunnerClientPool, Scheduler};
use crate::environment::{connect_docker, EnvironmentRegistry, RegistryError};
use crate::model::IdGenerator;
use crate::proxy::{ProxyConfig, TunnelProxy};
use crate::store::Database;

pub async fn run(config_path: &str) -> Result<()> {
    info!("loading host configuration from: {config_path}");
    let config = HostConfiguration::load(config_path)?;

    let db = Arc::new(Database::open(&config.database_path)?);

    let docker = connect_docker(&config.docker.socket)?;

    let registry = EnvironmentRegistry::new(config.shared_storage.environments_dir());
    bootstrap_default_environment(&docker, &registry, &config).await?;

    let preparation = Arc::new(PreparationManager::new(docker, registry));

    let dispatch = Arc::new(RunnerClientPool::new(Duration::from_secs(config.api.request_timeout_secs)));
    let ids = Arc::new(IdGenerator::new((std::process::id() & 0xf) as u8));
    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        dispatch.clone(),
        ids,
        config.shared_storage.task_outputs_dir(),
        config.shared_storage.task_errors_dir(),
    ));

    let state = AppState {
        db: db.clone(),
        scheduler,
        dispatch,
        preparation,
        default_base_image: config.docker.default_base_image.clone(),
    };
    let app = coordinator::build_router(state);

    let liveness_handle = spawn_liveness_monitor(db.clone(), config.heartbeat.clone());

    let proxy_config = ProxyConfig {
        bind_host: config.proxy.bind_host.clone(),
        bind_port: config.proxy.bind_port,
        handshake_timeout: Duration::from_secs(config.proxy.handshake_timeout_secs),
        dial_timeout: Duration::from_secs(config.proxy.dial_timeout_secs),
    };
    let proxy = TunnelProxy::new(proxy_config, db.clone());
    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy.run().await {
            error!(error = %e, "tunnel proxy stopped unexpectedly");
        }
    });

    let bind_addr = format!("{}:{}", config.api.bind_host, config.api.bind_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind api listener on {bind_addr}"))?;
    info!(bind_addr, "host control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("failed to install ctrl-c handler");
            }
            warn!("received shutdown signal, stopping host daemon");
        })
        .await?;

    liveness_handle.stop();
    proxy_task.abort();

    info!("host daemon stopped");
    Ok(())
}

/// Ensure the configured default environment has at least one committed
/// artifact before accepting task submissions (spec.md §4.2).
async fn bootstrap_default_environment(
    docker: &Docker,
    registry: &EnvironmentRegistry,
    config: &HostConfiguration,
) -> Result<()> {
    let now = Utc::now().timestamp() as u64;
    match registry
        .bootstrap_default(docker, &config.default_environment_name, &config.docker.default_base_image, now)
        .await
    {
        Ok(()) => Ok(()),
        Err(e @ RegistryError::Docker(_)) => {
            warn!(error = %e, "default environment bootstrap skipped, docker unavailable");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
