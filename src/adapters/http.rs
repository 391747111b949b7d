//! HTTP file-service endpoint.
//!
//! Uploads with `PUT <base>/<remote_folder>/<name>` and checks terminal
//! namespaces with `HEAD <base>/<namespace>/<name>` (404 means absent).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use super::{DeliveryEndpoint, EndpointError};

pub struct HttpEndpoint {
    base_url: String,
    remote_folder: String,
    client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        remote_folder: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            remote_folder: remote_folder.into(),
            client,
        })
    }

    /// Build `<base>/<segments...>`, skipping empty segments
    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments.iter().filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(segment.trim_matches('/'));
        }
        url
    }
}

fn unavailable(e: reqwest::Error) -> EndpointError {
    EndpointError::Unavailable(e.to_string())
}

#[async_trait]
impl DeliveryEndpoint for HttpEndpoint {
    fn name(&self) -> &str {
        "http"
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool, EndpointError> {
        let url = self.url(&[namespace, name]);
        let response = self.client.head(&url).send().await.map_err(unavailable)?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(EndpointError::Unavailable(format!(
                "HEAD {} returned {}",
                url, s
            ))),
        }
    }

    async fn upload(&self, name: &str, data: &[u8]) -> Result<(), EndpointError> {
        let url = self.url(&[&self.remote_folder, name]);
        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(data.to_vec())
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointError::Transfer {
                name: name.to_string(),
                reason: format!("{} {}", status, body.trim()),
            });
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), EndpointError> {
        let response = self
            .client
            .head(&self.base_url)
            .send()
            .await
            .map_err(unavailable)?;

        if response.status().is_server_error() {
            return Err(EndpointError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
