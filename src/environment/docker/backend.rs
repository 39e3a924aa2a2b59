//! `ProcessBackend` implementation over the Docker Engine API

use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions};
use bollard::Docker;
use dashmap::DashMap;
use tracing::info;

use crate::environment::sync::EnvironmentSync;
use crate::environment::traits::{
    BackendError, BackendResult, BackendStatus, LaunchSpec, ProcessBackend,
};

use super::build::build_container_config;
use super::power;

pub struct ContainerBackend {
    docker: Docker,
    sync: EnvironmentSync,
    container_pid_limit: i64,
    /// task id -> container name, for in-flight and recently-exited units.
    tracked: DashMap<u64, String>,
}

impl ContainerBackend {
    pub fn new(docker: Docker, sync: EnvironmentSync, container_pid_limit: i64) -> Self {
        Self {
            docker,
            sync,
            container_pid_limit,
            tracked: DashMap::new(),
        }
    }

    fn container_name(task_id: u64) -> String {
        format!("hakuriver-task-{task_id}")
    }
}

#[async_trait]
impl ProcessBackend for ContainerBackend {
    async fn run(&self, spec: LaunchSpec) -> BackendResult<Option<u16>> {
        let task_id = spec.task.id;
        if self.tracked.contains_key(&task_id) {
            return Err(BackendError::AlreadyTracked(task_id));
        }

        self.sync
            .ensure(&spec.task.environment)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let image = format!("env/{}:base", spec.task.environment);
        let config: Config<String> = build_container_config(&spec, &image, self.container_pid_limit);
        let container_name = Self::container_name(task_id);

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        power::start(&self.docker, &container_name).await?;
        self.tracked.insert(task_id, container_name.clone());

        let port = power::discover_ssh_port(&self.docker, &container_name).await?;
        info!(task_id, port = ?port, "container task started");
        Ok(port)
    }

    async fn pause(&self, task_id: u64) -> BackendResult<()> {
        let name = self.container_name_for(task_id)?;
        power::pause(&self.docker, &name).await
    }

    async fn resume(&self, task_id: u64) -> BackendResult<()> {
        let name = self.container_name_for(task_id)?;
        power::resume(&self.docker, &name).await
    }

    async fn kill(&self, task_id: u64) -> BackendResult<()> {
        let name = self.container_name_for(task_id)?;
        let result = power::kill(&self.docker, &name).await;
        self.tracked.remove(&task_id);
        result
    }

    async fn status(&self, task_id: u64) -> BackendResult<Option<BackendStatus>> {
        let Some(name) = self.tracked.get(&task_id).map(|r| r.clone()) else {
            return Ok(None);
        };
        let status = power::inspect_status(&self.docker, &name).await?;
        if matches!(
            status,
            Some(BackendStatus::Exited(_)) | Some(BackendStatus::OomKilled) | Some(BackendStatus::Failed(_))
        ) {
            self.tracked.remove(&task_id);
        }
        Ok(status)
    }
}

impl ContainerBackend {
    fn container_name_for(&self, task_id: u64) -> BackendResult<String> {
        self.tracked
            .get(&task_id)
            .map(|r| r.clone())
            .ok_or_else(|| BackendError::Other(format!("task {task_id} not tracked")))
    }
}
