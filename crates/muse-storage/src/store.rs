//! Upload seam for finished artifacts.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::{StorageError, StorageResult};

/// Destination for composed videos and thumbnails.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the file at `path` under `key`.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;

    /// URL a client can fetch `key` from.
    async fn public_url(&self, key: &str) -> StorageResult<String>;
}

/// Reject empty, absolute and parent-relative keys.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Store that copies artifacts into a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    base_url: Option<String>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: None,
        }
    }

    /// Serve URLs from `base_url` instead of `file://` paths.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn upload_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(path, &dest).await?;
        info!(key, bytes, "Stored artifact locally");
        Ok(())
    }

    async fn public_url(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        match &self.base_url {
            Some(base) => Ok(crate::client::join_public_url(base, key)),
            None => {
                let path = std::path::absolute(self.path_for(key))?;
                url::Url::from_file_path(&path)
                    .map(String::from)
                    .map_err(|_| StorageError::InvalidKey(key.to_string()))
            }
        }
    }
}
