//! Namespaced key→blob storage.
//!
//! Namespaces are plain directories under the store root. Writes land in a
//! hidden temp file first and are then renamed (or hard-linked for
//! write-once puts) into place, so readers never see a partial blob.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from a blob store backend
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("Invalid blob key (empty, hidden, or contains a path separator): {0:?}")]
    InvalidKey(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable key→blob store split into namespaces
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob, replacing any existing one
    async fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), BlobStoreError>;

    /// Write a blob only if the key is free. Returns `false` on conflict,
    /// in which case the stored blob is untouched.
    async fn put_if_absent(
        &self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> Result<bool, BlobStoreError>;

    /// Read a blob
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError>;

    /// Check whether a blob exists
    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, BlobStoreError>;

    /// List keys in a namespace, sorted
    async fn list(&self, namespace: &str) -> Result<Vec<String>, BlobStoreError>;
}

/// Reject keys that could escape the namespace or collide with temp files.
pub fn validate_key(key: &str) -> Result<(), BlobStoreError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(BlobStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Filesystem-backed blob store
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a namespace
    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn blob_path(&self, namespace: &str, key: &str) -> Result<PathBuf, BlobStoreError> {
        validate_key(namespace)?;
        validate_key(key)?;
        Ok(self.namespace_dir(namespace).join(key))
    }

    /// Write `data` into a fresh hidden temp file next to `target`
    async fn write_temp(&self, target: &Path, data: &[u8]) -> Result<PathBuf, BlobStoreError> {
        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).await.map_err(|source| BlobStoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        fs::write(&temp, data).await.map_err(|source| BlobStoreError::Io {
            path: temp.clone(),
            source,
        })?;

        Ok(temp)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), BlobStoreError> {
        let path = self.blob_path(namespace, key)?;
        let temp = self.write_temp(&path, data).await?;

        if let Err(source) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(BlobStoreError::Io { path, source });
        }

        Ok(())
    }

    async fn put_if_absent(
        &self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> Result<bool, BlobStoreError> {
        let path = self.blob_path(namespace, key)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(false);
        }

        let temp = self.write_temp(&path, data).await?;

        // hard_link fails with AlreadyExists if another writer won the race
        let linked = fs::hard_link(&temp, &path).await;
        let _ = fs::remove_file(&temp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(BlobStoreError::Io { path, source }),
        }
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        let path = self.blob_path(namespace, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BlobStoreError::Io { path, source }),
        }
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, BlobStoreError> {
        let path = self.blob_path(namespace, key)?;
        fs::try_exists(&path)
            .await
            .map_err(|source| BlobStoreError::Io { path, source })
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>, BlobStoreError> {
        validate_key(namespace)?;
        let dir = self.namespace_dir(namespace);

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(BlobStoreError::Io { path: dir, source }),
        };

        let mut keys = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(BlobStoreError::Io {
                        path: dir.clone(),
                        source,
                    })
                }
            };

            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    keys.push(name.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
