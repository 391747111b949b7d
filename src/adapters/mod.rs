//! Delivery endpoint interfaces.
//!
//! An endpoint receives artifact files and exposes two terminal namespaces
//! (processed / failed) that the receiving side populates. The pipeline only
//! checks those namespaces for existence, never reads them.

pub mod directory;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{EndpointKind, EndpointSettings};

pub use directory::DirectoryEndpoint;
pub use http::HttpEndpoint;

/// Errors from a delivery endpoint. All of them are transient from the
/// pipeline's point of view: the artifact stays queued.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("Transfer of {name} rejected: {reason}")]
    Transfer { name: String, reason: String },

    #[error("Endpoint call timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for file-delivery endpoints
#[async_trait]
pub trait DeliveryEndpoint: Send + Sync {
    /// Human-readable endpoint name
    fn name(&self) -> &str;

    /// Check whether `<namespace>/<name>` exists at the endpoint
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool, EndpointError>;

    /// Transfer an artifact. Re-uploading the same name overwrites.
    async fn upload(&self, name: &str, data: &[u8]) -> Result<(), EndpointError>;

    /// Verify the endpoint is reachable
    async fn health_check(&self) -> Result<(), EndpointError>;
}

/// Build the endpoint described by the settings
pub fn build_endpoint(settings: &EndpointSettings) -> Result<Arc<dyn DeliveryEndpoint>> {
    match settings.kind {
        EndpointKind::Directory => {
            let root = settings
                .root
                .clone()
                .context("endpoint.root is required for a directory endpoint")?;
            Ok(Arc::new(DirectoryEndpoint::new(
                root,
                settings.remote_folder.clone(),
            )))
        }
        EndpointKind::Http => {
            let url = settings
                .url
                .clone()
                .context("endpoint.url is required for an http endpoint")?;
            Ok(Arc::new(HttpEndpoint::new(
                url,
                settings.remote_folder.clone(),
                settings.timeout(),
            )?))
        }
    }
}
