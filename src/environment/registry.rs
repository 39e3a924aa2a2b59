//! Host-side environment artifact registry (spec.md §3, §4.2)
//!
//! Artifacts live on shared storage as `<name>-<unix-seconds>.tar`; the
//! latest by numeric suffix wins (I3), ties broken lexicographically since
//! the suffix is a decimal timestamp. New versions are committed via
//! write-to-temp-then-rename so concurrent readers never see a partial
//! file, and older versions for the same name are pruned on success.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::system::LockerRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("environment not found: {0}")]
    NotFound(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// One resolved artifact: its environment name and commit timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactVersion {
    pub name: String,
    pub unix_seconds: u64,
    pub path: PathBuf,
}

pub struct EnvironmentRegistry {
    environments_dir: PathBuf,
    lockers: Arc<LockerRegistry>,
}

impl EnvironmentRegistry {
    pub fn new(environments_dir: impl Into<PathBuf>) -> Self {
        Self {
            environments_dir: environments_dir.into(),
            lockers: Arc::new(LockerRegistry::new()),
        }
    }

    /// Resolve the newest artifact for `name`, if any exists (I3).
    pub fn latest(&self, name: &str) -> RegistryResult<Option<ArtifactVersion>> {
        let versions = self.list_versions(name)?;
        Ok(versions.into_iter().max_by_key(|v| v.unix_seconds))
    }

    fn list_versions(&self, name: &str) -> RegistryResult<Vec<ArtifactVersion>> {
        let mut out = Vec::new();
        if !self.environments_dir.exists() {
            return Ok(out);
        }
        let prefix = format!("{name}-");
        for entry in std::fs::read_dir(&self.environments_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            let Some(rest) = file_name.strip_prefix(&prefix) else { continue };
            let Some(ts_str) = rest.strip_suffix(".tar") else { continue };
            let Ok(unix_seconds) = ts_str.parse::<u64>() else { continue };
            out.push(ArtifactVersion {
                name: name.to_string(),
                unix_seconds,
                path: entry.path(),
            });
        }
        Ok(out)
    }

    /// List the latest artifact for every environment name present on
    /// shared storage, for the environment-management listing endpoint.
    pub fn list_all(&self) -> RegistryResult<Vec<ArtifactVersion>> {
        let mut latest: std::collections::HashMap<String, ArtifactVersion> = std::collections::HashMap::new();
        if !self.environments_dir.exists() {
            return Ok(Vec::new());
        }
        for entry in std::fs::read_dir(&self.environments_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            let Some(rest) = file_name.strip_suffix(".tar") else { continue };
            let Some((name, ts_str)) = rest.rsplit_once('-') else { continue };
            let Ok(unix_seconds) = ts_str.parse::<u64>() else { continue };
            let candidate = ArtifactVersion {
                name: name.to_string(),
                unix_seconds,
                path: entry.path(),
            };
            latest
                .entry(name.to_string())
                .and_modify(|existing| {
                    if candidate.unix_seconds > existing.unix_seconds {
                        *existing = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }
        let mut out: Vec<_> = latest.into_values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Commit a new artifact for `name` from `source_tar`, serialized per
    /// name, pruning older versions on success.
    pub async fn commit(
        &self,
        name: &str,
        source_tar: &Path,
        unix_seconds: u64,
    ) -> RegistryResult<ArtifactVersion> {
        let locker = self.lockers.get(name);
        let _guard = locker.acquire().await;

        std::fs::create_dir_all(&self.environments_dir)?;
        let final_path = self.environments_dir.join(format!("{name}-{unix_seconds}.tar"));
        let tmp_path = self.environments_dir.join(format!(".{name}-{unix_seconds}.tmp"));

        std::fs::copy(source_tar, &tmp_path)?;
        std::fs::rename(&tmp_path, &final_path)?;

        let previous = self.list_versions(name)?;
        for version in previous {
            if version.unix_seconds != unix_seconds {
                if let Err(e) = std::fs::remove_file(&version.path) {
                    warn!(path = %version.path.display(), error = %e, "failed to prune old artifact");
                }
            }
        }

        info!(name, unix_seconds, "committed environment artifact");
        Ok(ArtifactVersion {
            name: name.to_string(),
            unix_seconds,
            path: final_path,
        })
    }

    /// Bootstrap the default environment at Host startup by exporting a
    /// freshly pulled base image into a version-0 artifact, if one isn't
    /// already present.
    pub async fn bootstrap_default(
        &self,
        docker: &Docker,
        name: &str,
        base_image: &str,
        now_unix_seconds: u64,
    ) -> RegistryResult<()> {
        if self.latest(name)?.is_some() {
            return Ok(());
        }

        info!(name, base_image, "bootstrapping default environment");
        let options = CreateImageOptions {
            from_image: base_image,
            ..Default::default()
        };
        let mut stream = docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result?;
        }

        let tmp_tar = std::env::temp_dir().join(format!("hakuriver-bootstrap-{name}.tar"));
        {
            let mut export_stream = docker.export_image(base_image);
            let mut file = tokio::fs::File::create(&tmp_tar).await?;
            use tokio::io::AsyncWriteExt;
            while let Some(chunk) = export_stream.next().await {
                file.write_all(&chunk?).await?;
            }
        }

        self.commit(name, &tmp_tar, now_unix_seconds).await?;
        let _ = std::fs::remove_file(&tmp_tar);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_picks_highest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default-100.tar"), b"a").unwrap();
        std::fs::write(dir.path().join("default-200.tar"), b"b").unwrap();
        std::fs::write(dir.path().join("other-300.tar"), b"c").unwrap();

        let registry = EnvironmentRegistry::new(dir.path());
        let latest = registry.latest("default").unwrap().unwrap();
        assert_eq!(latest.unix_seconds, 200);
    }

    #[test]
    fn latest_is_none_when_no_artifacts_exist() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EnvironmentRegistry::new(dir.path());
        assert!(registry.latest("default").unwrap().is_none());
    }

    #[test]
    fn list_all_reports_latest_per_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default-100.tar"), b"a").unwrap();
        std::fs::write(dir.path().join("default-200.tar"), b"b").unwrap();
        std::fs::write(dir.path().join("cuda-50.tar"), b"c").unwrap();

        let registry = EnvironmentRegistry::new(dir.path());
        let all = registry.list_all().unwrap();
        assert_eq!(all.len(), 2);
        let default = all.iter().find(|a| a.name == "default").unwrap();
        assert_eq!(default.unix_seconds, 200);
    }

    #[tokio::test]
    async fn commit_prunes_older_versions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EnvironmentRegistry::new(dir.path());

        let src = dir.path().join("src.tar");
        std::fs::write(&src, b"v1").unwrap();
        registry.commit("default", &src, 100).await.unwrap();

        std::fs::write(&src, b"v2").unwrap();
        registry.commit("default", &src, 200).await.unwrap();

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("default-"))
            .collect();
        assert_eq!(remaining, vec!["default-200.tar".to_string()]);
    }
}
