//! Drop-directory endpoint.
//!
//! Artifacts are written into `<root>/<remote_folder>/`. The receiving side
//! (a 3PL import job, or a mounted SFTP share) moves them into
//! `<root>/<processed>/` or `<root>/<failed>/` once handled.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::{DeliveryEndpoint, EndpointError};

pub struct DirectoryEndpoint {
    root: PathBuf,
    remote_folder: String,
}

impl DirectoryEndpoint {
    pub fn new(root: impl Into<PathBuf>, remote_folder: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            remote_folder: remote_folder.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder uploads land in
    pub fn upload_dir(&self) -> PathBuf {
        self.root.join(&self.remote_folder)
    }
}

#[async_trait]
impl DeliveryEndpoint for DirectoryEndpoint {
    fn name(&self) -> &str {
        "directory"
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool, EndpointError> {
        let path = self.root.join(namespace).join(name);
        Ok(fs::try_exists(&path).await?)
    }

    async fn upload(&self, name: &str, data: &[u8]) -> Result<(), EndpointError> {
        let dir = self.upload_dir();
        fs::create_dir_all(&dir).await?;

        // Hidden temp name so the receiving side never picks up a partial file
        let temp = dir.join(format!(".{}.{}.part", name, Uuid::new_v4()));
        fs::write(&temp, data).await?;

        if let Err(e) = fs::rename(&temp, dir.join(name)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(EndpointError::Transfer {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), EndpointError> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            EndpointError::Unavailable(format!("{}: {}", self.root.display(), e))
        })?;

        if !metadata.is_dir() {
            return Err(EndpointError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_lands_in_remote_folder() {
        let temp = TempDir::new().unwrap();
        let endpoint = DirectoryEndpoint::new(temp.path(), "inbound");

        endpoint.upload("a.csv", b"h\nr\n").await.unwrap();

        let written = std::fs::read(temp.path().join("inbound").join("a.csv")).unwrap();
        assert_eq!(written, b"h\nr\n");

        // No temp files left behind
        let names: Vec<_> = std::fs::read_dir(temp.path().join("inbound"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let temp = TempDir::new().unwrap();
        let endpoint = DirectoryEndpoint::new(temp.path(), "inbound");

        endpoint.upload("a.csv", b"v1").await.unwrap();
        endpoint.upload("a.csv", b"v2").await.unwrap();

        let written = std::fs::read(temp.path().join("inbound").join("a.csv")).unwrap();
        assert_eq!(written, b"v2");
    }

    #[tokio::test]
    async fn test_exists_in_terminal_namespace() {
        let temp = TempDir::new().unwrap();
        let endpoint = DirectoryEndpoint::new(temp.path(), "inbound");

        assert!(!endpoint.exists("processed", "a.csv").await.unwrap());

        std::fs::create_dir_all(temp.path().join("processed")).unwrap();
        std::fs::write(temp.path().join("processed").join("a.csv"), b"").unwrap();

        assert!(endpoint.exists("processed", "a.csv").await.unwrap());
        assert!(!endpoint.exists("failed", "a.csv").await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check() {
        let temp = TempDir::new().unwrap();
        assert!(DirectoryEndpoint::new(temp.path(), "inbound")
            .health_check()
            .await
            .is_ok());

        let missing = DirectoryEndpoint::new(temp.path().join("nope"), "inbound");
        assert!(matches!(
            missing.health_check().await,
            Err(EndpointError::Unavailable(_))
        ));
    }
}
