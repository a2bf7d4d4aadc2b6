use async_trait::async_trait;
use log::{error, info};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("invalid key")]
    InvalidKey,
    #[error("other: {0}")]
    Other(String),
}

/// Blob storage for uploaded post images, addressed by relative key
/// (e.g. `posts/<sha256>.png`).
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ImageStoreError>;
}

/// Stores images as plain files below an upload root.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Keys are relative, slash-separated and may not climb out of the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, ImageStoreError> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ImageStoreError::InvalidKey);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                error!("create_dir_all failed dir={} err={e}", dir.display());
                ImageStoreError::Other(e.to_string())
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            error!("write failed key={key} path={} err={e}", path.display());
            ImageStoreError::Other(e.to_string())
        })?;
        info!("stored image key={key} size={}", bytes.len());
        Ok(())
    }
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(key)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ImageStoreError::NotFound,
            _ => ImageStoreError::Other(e.to_string()),
        })?;
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }
    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        // Best-effort delete: treat not found as success
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ImageStoreError::Other(e.to_string())),
        }
    }
}

// Factory helper used in main
pub fn build_image_store(media_root: &Path) -> Arc<dyn ImageStore> {
    info!("image uploads stored under {}", media_root.display());
    Arc::new(FsImageStore::new(media_root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        store.save("posts/a.gif", gif).await.unwrap();
        assert!(matches!(store.save("posts/a.gif", gif).await, Err(ImageStoreError::Duplicate)));
        let (bytes, mime) = store.load("posts/a.gif").await.unwrap();
        assert_eq!(bytes, gif.to_vec());
        assert_eq!(mime, "image/gif");
        store.delete("posts/a.gif").await.unwrap();
        assert!(matches!(store.load("posts/a.gif").await, Err(ImageStoreError::NotFound)));
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        assert!(matches!(store.load("../etc/passwd").await, Err(ImageStoreError::InvalidKey)));
        assert!(matches!(store.load("/etc/passwd").await, Err(ImageStoreError::InvalidKey)));
    }
}
