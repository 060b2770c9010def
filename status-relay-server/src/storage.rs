//! Object storage for uploaded artifacts.
//!
//! The relay only needs the location string an upload ends up at, so the
//! store sits behind [`ArtifactStore`]. [`LocalArtifactStore`] keeps objects
//! on the local filesystem under `<root>/<bucket>/<key>`.

use async_trait::async_trait;
use status_relay::ImageId;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Failed to write {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `body` under `key` and returns the object's location.
    async fn put(&self, key: &str, body: &[u8]) -> Result<String, StorageError>;
}

/// Object key for an uploaded image.
pub fn artifact_key(id: &ImageId) -> String {
    format!("uploads/{id}/image.png")
}

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    bucket: String,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let only_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !only_normal {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.bucket_dir().join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, key: &str, body: &[u8]) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, body).await.map_err(io_err)?;

        debug!("Stored {} bytes at {}", body.len(), path.display());
        Ok(format!("file://{}", path.display()))
    }
}
