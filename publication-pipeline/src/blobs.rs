use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use interfaces::{BlobStore, CapabilityError};

/// Blobs kept as files under a root directory. Keys are relative paths and
/// may not climb out of the root.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CapabilityError> {
        let relative = Path::new(key);
        let safe = !key.is_empty() && relative.components().all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(CapabilityError::unavailable("blob store", format!("invalid key {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CapabilityError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CapabilityError::not_found("blob store", key)),
            Err(e) => Err(CapabilityError::unavailable("blob store", e.to_string())),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CapabilityError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CapabilityError::unavailable("blob store", e.to_string()))?;
        }
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| CapabilityError::unavailable("blob store", e.to_string()))
    }
}
