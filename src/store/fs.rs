use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{ArtifactKey, ArtifactStore, StoreError};
use crate::config::ServiceConfig;

const SEAL_SUFFIX: &str = ".sealed";

/// Artifacts on the local filesystem under `root`, one folder per
/// company and document. A sealed artifact has an empty `<file>.sealed`
/// marker next to it.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the configured `artifact_dir`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.artifact_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(location);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::NotFound(location.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn seal_marker(path: &Path) -> PathBuf {
    let mut marker = path.as_os_str().to_owned();
    marker.push(SEAL_SUFFIX);
    PathBuf::from(marker)
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        key: &ArtifactKey,
        bytes: Vec<u8>,
        sealed: bool,
    ) -> Result<String, StoreError> {
        let location = key.path();
        let path = self.resolve(&location)?;
        let marker = seal_marker(&path);
        if tokio::fs::try_exists(&marker).await? {
            return Err(StoreError::Immutable(location));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        if sealed {
            tokio::fs::write(&marker, b"").await?;
        }
        tracing::debug!(%location, bytes = bytes.len(), sealed, "artifact stored");
        Ok(location)
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(location.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
