//! Media storage boundary contract (spec.md §6): `ObjectStore` abstracts
//! over whatever backs uploaded participant/manager media. `FilesystemStore`
//! is the development backend named by `media.root` in `Settings`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object name: {0}")]
    InvalidName(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("signed upload urls are not supported by this backend")]
    SignedUploadUnsupported,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), ObjectStoreError>;
    async fn get(&self, name: &str) -> Result<Vec<u8>, ObjectStoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;
    async fn delete(&self, name: &str) -> Result<(), ObjectStoreError>;
    fn public_url(&self, name: &str) -> String;
    async fn signed_upload_url(&self, _name: &str, _content_type: &str, _ttl_secs: u64) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError::SignedUploadUnsupported)
    }
}

/// Rejects `..`, absolute paths, and empty segments so a stored object name
/// can never escape `root`.
fn safe_path(root: &Path, name: &str) -> Result<PathBuf, ObjectStoreError> {
    if name.is_empty() || name.starts_with('/') {
        return Err(ObjectStoreError::InvalidName(name.to_string()));
    }
    let mut path = root.to_path_buf();
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(ObjectStoreError::InvalidName(name.to_string()));
        }
        path.push(segment);
    }
    Ok(path)
}

pub struct FilesystemStore {
    root: PathBuf,
    public_base_url: String,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        let path = safe_path(&self.root, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = safe_path(&self.root, name)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ObjectStoreError::NotFound(name.to_string()),
            _ => ObjectStoreError::Io(e),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut names = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&self.root) {
                    let name = relative.to_string_lossy().replace('\\', "/");
                    if name.starts_with(prefix) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<(), ObjectStoreError> {
        let path = safe_path(&self.root, name)?;
        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ObjectStoreError::NotFound(name.to_string()),
            _ => ObjectStoreError::Io(e),
        })
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), name)
    }
}
