//! Runner-side environment sync protocol (spec.md §3, §4.2)
//!
//! Before a task runs, the local image `env/<name>:base` must match the
//! latest artifact's timestamp. The Docker image itself carries no natural
//! "last synced" field we can cheaply compare against after a tag-only
//! load, so the runner tracks it in a small sidecar marker file next to
//! the environments directory, written after a successful import+tag —
//! the same write-once-after-success discipline the registry uses for
//! artifact commits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bollard::image::{ImportImageOptions, TagImageOptions};
use bollard::Docker;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::info;

use crate::environment::registry::{ArtifactVersion, EnvironmentRegistry};
use crate::system::LockerRegistry;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment has no artifact: {0}")]
    NoArtifact(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

fn repo_tag(name: &str) -> (String, &'static str) {
    (format!("env/{name}"), "base")
}

pub struct EnvironmentSync {
    docker: Docker,
    registry: EnvironmentRegistry,
    markers_dir: PathBuf,
    lockers: Arc<LockerRegistry>,
}

impl EnvironmentSync {
    pub fn new(docker: Docker, environments_dir: impl Into<PathBuf>) -> Self {
        let environments_dir = environments_dir.into();
        let markers_dir = environments_dir.join(".synced");
        Self {
            docker,
            registry: EnvironmentRegistry::new(environments_dir),
            markers_dir,
            lockers: Arc::new(LockerRegistry::new()),
        }
    }

    /// Ensure `env/<name>:base` reflects the latest committed artifact,
    /// loading it if missing or stale. Concurrent calls for the same name
    /// coalesce on a per-name lock.
    pub async fn ensure(&self, name: &str) -> SyncResult<()> {
        let locker = self.lockers.get(name);
        let _guard = locker.acquire().await;

        let latest = self
            .registry
            .latest(name)
            .map_err(|e| SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
            .ok_or_else(|| SyncError::NoArtifact(name.to_string()))?;

        if self.marker_matches(name, latest.unix_seconds)? {
            return Ok(());
        }

        self.load(name, &latest).await
    }

    fn marker_path(&self, name: &str) -> PathBuf {
        self.markers_dir.join(format!("{name}.synced_at"))
    }

    fn marker_matches(&self, name: &str, unix_seconds: u64) -> SyncResult<bool> {
        let path = self.marker_path(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content.trim().parse::<u64>().ok() == Some(unix_seconds)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SyncError::Io(e)),
        }
    }

    async fn load(&self, name: &str, artifact: &ArtifactVersion) -> SyncResult<()> {
        info!(name, unix_seconds = artifact.unix_seconds, "loading environment artifact");
        let loaded_repo_tag = self.import(&artifact.path).await?;

        let (repo, tag) = repo_tag(name);
        if let Some((source_repo, source_tag)) = loaded_repo_tag {
            self.docker
                .tag_image(
                    &format!("{source_repo}:{source_tag}"),
                    Some(TagImageOptions { repo, tag }),
                )
                .await?;
        }

        self.stamp_marker(name, artifact.unix_seconds)?;
        Ok(())
    }

    /// Import a `.tar` archive into the local Docker image store, returning
    /// the repo:tag it landed under, if one was embedded in the archive.
    async fn import(&self, tar_path: &Path) -> SyncResult<Option<(String, String)>> {
        let bytes = tokio::fs::read(tar_path).await?;
        let options = ImportImageOptions {
            quiet: true,
            ..Default::default()
        };
        let mut stream = self.docker.import_image(options, bytes.into(), None);
        let mut landed = None;
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(stream_msg) = info.stream {
                if let Some((repo, tag)) = stream_msg.trim().rsplit_once(':') {
                    landed = Some((repo.to_string(), tag.to_string()));
                }
            }
        }
        Ok(landed)
    }

    fn stamp_marker(&self, name: &str, unix_seconds: u64) -> SyncResult<()> {
        std::fs::create_dir_all(&self.markers_dir)?;
        let path = self.marker_path(name);
        let tmp = self.markers_dir.join(format!(".{name}.tmp"));
        std::fs::write(&tmp, unix_seconds.to_string())?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_matches_only_exact_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let docker = Docker::connect_with_local_defaults().expect("docker socket");
        let sync = EnvironmentSync::new(docker, dir.path());

        assert!(!sync.marker_matches("default", 100).unwrap());
        sync.stamp_marker("default", 100).unwrap();
        assert!(sync.marker_matches("default", 100).unwrap());
        assert!(!sync.marker_matches("default", 200).unwrap());
    }
}
