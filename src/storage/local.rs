//! Local filesystem asset store

use crate::storage::atomic::write_atomic;
use crate::storage::traits::{AssetStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Stores assets under a root directory, one file per key
///
/// Writes go to a temporary sibling file and are renamed into place.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a `/`-separated key onto a path below the root
    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::Permanent {
                    key: key.to_string(),
                    reason: "key contains an empty or relative segment".to_string(),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl AssetStore for LocalStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let data = bytes.to_vec();
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .map_err(|e| StorageError::Transient {
                key: key.to_string(),
                reason: format!("write task failed: {}", e),
            })?
            .map_err(|source| StorageError::Io { path, source })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }

    fn locate(&self, key: &str) -> String {
        match self.path_for(key) {
            Ok(path) => path.display().to_string(),
            Err(_) => format!("{}/{}", self.root.display(), key),
        }
    }
}
