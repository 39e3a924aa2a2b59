//! Environment-management endpoints backing: a per-name persistent
//! preparation container the operator can shell into, committed into a
//! new versioned artifact through the [`EnvironmentRegistry`] (spec.md
//! §4.4, "environment-management endpoints").

use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::{CommitContainerOptions, CreateImageOptions};
use bollard::Docker;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::environment::{ArtifactVersion, EnvironmentRegistry};

#[derive(Debug, Error)]
pub enum PreparationError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("registry error: {0}")]
    Registry(#[from] crate::environment::RegistryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PreparationResult<T> = Result<T, PreparationError>;

fn preparation_container_name(name: &str) -> String {
    format!("hakuriver-prep-{name}")
}

pub struct PreparationManager {
    docker: Docker,
    registry: EnvironmentRegistry,
}

impl PreparationManager {
    pub fn new(docker: Docker, registry: EnvironmentRegistry) -> Self {
        Self { docker, registry }
    }

    /// Create a persistent container for `name`, seeded from the latest
    /// artifact if one exists, otherwise from `base_image`.
    pub async fn create(&self, name: &str, base_image: &str) -> PreparationResult<()> {
        let source_image = match self.registry.latest(name)? {
            Some(artifact) => self.load_for_edit(&artifact).await?,
            None => {
                let options = CreateImageOptions {
                    from_image: base_image,
                    ..Default::default()
                };
                let mut stream = self.docker.create_image(Some(options), None, None);
                while let Some(result) = stream.next().await {
                    result?;
                }
                base_image.to_string()
            }
        };

        let container_name = preparation_container_name(name);
        let config = Config {
            image: Some(source_image),
            tty: Some(true),
            cmd: Some(vec!["/bin/sh".to_string()]),
            ..Default::default()
        };
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;
        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await?;

        info!(name, "created environment preparation container");
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> PreparationResult<()> {
        let container_name = preparation_container_name(name);
        self.docker
            .stop_container(&container_name, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    pub async fn start(&self, name: &str) -> PreparationResult<()> {
        let container_name = preparation_container_name(name);
        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> PreparationResult<()> {
        let container_name = preparation_container_name(name);
        let _ = self.docker.stop_container(&container_name, None::<StopContainerOptions>).await;
        self.docker
            .remove_container(
                &container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    /// Commit the preparation container into a fresh versioned artifact.
    pub async fn commit(&self, name: &str, now_unix_seconds: u64) -> PreparationResult<ArtifactVersion> {
        let container_name = preparation_container_name(name);
        let commit_options = CommitContainerOptions {
            container: container_name,
            repo: format!("hakuriver/prep-{name}"),
            tag: now_unix_seconds.to_string(),
            ..Default::default()
        };
        let commit = self.docker.commit_container(&commit_options, Config::<String>::default()).await?;
        let image_ref = commit.id;

        let tmp_tar = std::env::temp_dir().join(format!("hakuriver-commit-{name}-{now_unix_seconds}.tar"));
        {
            let mut export_stream = self.docker.export_image(&image_ref);
            let mut file = tokio::fs::File::create(&tmp_tar).await?;
            while let Some(chunk) = export_stream.next().await {
                file.write_all(&chunk?).await?;
            }
        }

        let artifact = self.registry.commit(name, &tmp_tar, now_unix_seconds).await?;
        let _ = std::fs::remove_file(&tmp_tar);
        let _ = self.docker.remove_image(&image_ref, None, None).await;

        info!(name, timestamp = now_unix_seconds, "committed prepared environment");
        Ok(artifact)
    }

    pub fn list_artifacts(&self) -> PreparationResult<Vec<ArtifactVersion>> {
        Ok(self.registry.list_all()?)
    }

    async fn load_for_edit(&self, artifact: &ArtifactVersion) -> PreparationResult<String> {
        let bytes = tokio::fs::read(&artifact.path).await?;
        let options = bollard::image::ImportImageOptions {
            quiet: true,
            ..Default::default()
        };
        let mut import_stream = self.docker.import_image(options, bytes.into(), None);
        let mut tag = format!("hakuriver/prep-{}:source", artifact.name);
        while let Some(result) = import_stream.next().await {
            let info = result?;
            if let Some(stream_msg) = info.stream {
                if let Some((repo, version)) = stream_msg.trim().rsplit_once(':') {
                    tag = format!("{repo}:{version}");
                }
            }
        }
        Ok(tag)
    }
}
