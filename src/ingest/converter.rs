//! Conversion stage: stored raw event → queued CSV artifact.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::ResolvedConfig;
use crate::core::{PipelineError, Transformer};
use crate::domain::{artifact_name, ConvertedArtifact};
use crate::storage::{BlobStore, DurableQueue};

/// Reads raw events, renders them and queues the artifacts
#[derive(Clone)]
pub struct ConversionStage {
    blobs: Arc<dyn BlobStore>,
    queue: DurableQueue,
    transformer: Transformer,
    raw_namespace: String,
    archive_namespace: String,
    dead_letter_namespace: String,
    skipped_namespace: String,
    abandoned_namespace: String,
    topic: String,
}

impl ConversionStage {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        queue: DurableQueue,
        transformer: Transformer,
        config: &ResolvedConfig,
    ) -> Self {
        Self {
            blobs,
            queue,
            transformer,
            raw_namespace: config.namespaces.raw.clone(),
            archive_namespace: config.namespaces.archive.clone(),
            dead_letter_namespace: config.namespaces.dead_letter.clone(),
            skipped_namespace: config.namespaces.skipped.clone(),
            abandoned_namespace: config.namespaces.abandoned.clone(),
            topic: config.delivery.topic.clone(),
        }
    }

    pub fn raw_namespace(&self) -> &str {
        &self.raw_namespace
    }

    /// Convert one stored event and enqueue the artifact
    #[instrument(skip(self))]
    pub async fn convert(&self, event_key: &str) -> Result<ConvertedArtifact, PipelineError> {
        let raw = self
            .blobs
            .get(&self.raw_namespace, event_key)
            .await?
            .ok_or_else(|| PipelineError::malformed(event_key, "raw event not found"))?;
        let raw = String::from_utf8(raw).map_err(|e| PipelineError::malformed(event_key, e))?;

        let artifact = self.transformer.convert(event_key, &raw)?;
        let queued = self
            .queue
            .enqueue(&self.topic, &artifact.name, &artifact.content)
            .await?;

        info!(
            artifact = %artifact.name,
            rows = artifact.row_count(),
            replaced = !queued.is_new(),
            "Artifact queued"
        );
        Ok(artifact)
    }

    /// Convert and report the artifact name, logging failures.
    ///
    /// Malformed events are abandoned and recorded under the abandoned
    /// namespace with the reason; storage failures are left for the next
    /// catch-up scan.
    pub async fn handle(&self, event_key: &str) -> Option<String> {
        match self.convert(event_key).await {
            Ok(artifact) => Some(artifact.name),
            Err(e @ PipelineError::MalformedArtifact { .. }) => {
                error!(%event_key, error = %e, "Abandoning malformed event");
                let reason = e.to_string();
                if let Err(e) = self
                    .blobs
                    .put(&self.abandoned_namespace, event_key, reason.as_bytes())
                    .await
                {
                    warn!(%event_key, error = %e, "Failed to record abandoned event");
                }
                None
            }
            Err(e) => {
                warn!(%event_key, error = %e, "Conversion failed");
                None
            }
        }
    }

    /// Whether an event already went through conversion: its artifact is
    /// queued, archived, dead-lettered or skipped, or the event itself was
    /// abandoned
    pub async fn is_known(&self, event_key: &str) -> Result<bool, PipelineError> {
        if self.blobs.exists(&self.abandoned_namespace, event_key).await? {
            return Ok(true);
        }

        let name = artifact_name(event_key);
        if self.queue.get(&self.topic, &name).await?.is_some() {
            return Ok(true);
        }
        for namespace in [
            &self.archive_namespace,
            &self.dead_letter_namespace,
            &self.skipped_namespace,
        ] {
            if self.blobs.exists(namespace, &name).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stored raw events with no artifact anywhere in the pipeline
    pub async fn unconverted(&self) -> Result<Vec<String>, PipelineError> {
        let mut keys = Vec::new();
        for key in self.blobs.list(&self.raw_namespace).await? {
            if !self.is_known(&key).await? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
