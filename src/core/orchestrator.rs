//! Delivery orchestrator.
//!
//! Drains queued artifacts to the delivery endpoint. Both invocation modes,
//! the scheduled sweep and the single-item trigger, run the same per-artifact
//! sequence:
//!
//! 1. Terminal check: if the endpoint already holds `processed/<name>` or
//!    `failed/<name>`, record the skip and dequeue without delivering.
//! 2. Upload, then write the archive copy, then dequeue.
//! 3. On failure the entry stays queued for a later invocation.
//!
//! Every error is contained at the artifact boundary: one bad artifact never
//! stops a sweep.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, field, info, instrument, warn, Span};
use uuid::Uuid;

use crate::adapters::{DeliveryEndpoint, EndpointError};
use crate::config::ResolvedConfig;
use crate::domain::{DeliveryOutcome, SweepReport};
use crate::storage::{BlobStore, ClaimResult, DurableQueue};

/// Names and limits the orchestrator works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub topic: String,
    pub processed_namespace: String,
    pub failed_namespace: String,
    pub archive_namespace: String,
    pub dead_letter_namespace: String,
    /// Where skipped artifacts are recorded before they leave the queue
    pub skipped_namespace: String,
    /// Upper bound for each endpoint call
    pub call_timeout: Duration,
    /// Lease held while an artifact is in flight (disabled when `None`)
    pub lease: Option<Duration>,
    /// Dead-letter after this many failed deliveries (disabled when `None`)
    pub max_attempts: Option<u32>,
    /// Compact the topic log after a sweep once this many lines are
    /// superseded (0 disables)
    pub compact_after_lines: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            topic: "processed-csv".to_string(),
            processed_namespace: "processed".to_string(),
            failed_namespace: "failed".to_string(),
            archive_namespace: "dispatch-archive".to_string(),
            dead_letter_namespace: "dead-letter".to_string(),
            skipped_namespace: "dispatch-skipped".to_string(),
            call_timeout: Duration::from_secs(30),
            lease: None,
            max_attempts: None,
            compact_after_lines: 1000,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            topic: config.delivery.topic.clone(),
            processed_namespace: config.endpoint.processed_namespace.clone(),
            failed_namespace: config.endpoint.failed_namespace.clone(),
            archive_namespace: config.namespaces.archive.clone(),
            dead_letter_namespace: config.namespaces.dead_letter.clone(),
            skipped_namespace: config.namespaces.skipped.clone(),
            call_timeout: config.endpoint.timeout(),
            lease: config.delivery.lease_seconds.map(Duration::from_secs),
            max_attempts: config.delivery.max_attempts.filter(|n| *n > 0),
            compact_after_lines: config.delivery.compact_after_lines,
        }
    }
}

/// Drains the artifact queue to a delivery endpoint
pub struct DeliveryOrchestrator {
    queue: DurableQueue,
    endpoint: Arc<dyn DeliveryEndpoint>,
    blobs: Arc<dyn BlobStore>,
    settings: OrchestratorSettings,
}

impl DeliveryOrchestrator {
    pub fn new(
        queue: DurableQueue,
        endpoint: Arc<dyn DeliveryEndpoint>,
        blobs: Arc<dyn BlobStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            queue,
            endpoint,
            blobs,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    /// Single-item trigger: process one named artifact
    #[instrument(skip(self), fields(invocation_id = field::Empty))]
    pub async fn process_artifact(&self, name: &str) -> DeliveryOutcome {
        let invocation_id = Uuid::new_v4().to_string();
        Span::current().record("invocation_id", invocation_id.as_str());

        let outcome = self.deliver_one(name, &invocation_id).await;
        info!(state = %outcome.state(), "Trigger finished");
        outcome
    }

    /// Scheduled sweep: attempt every queued artifact once
    pub async fn sweep(&self) -> SweepReport {
        let (_tx, rx) = watch::channel(false);
        self.sweep_until(rx).await
    }

    /// Sweep that stops after the in-flight artifact once `shutdown` turns
    /// `true`.
    #[instrument(skip(self, shutdown), fields(invocation_id = field::Empty))]
    pub async fn sweep_until(&self, shutdown: watch::Receiver<bool>) -> SweepReport {
        let invocation_id = Uuid::new_v4().to_string();
        Span::current().record("invocation_id", invocation_id.as_str());

        let holder = self.settings.lease.map(|_| invocation_id.as_str());
        let mut attempted: HashSet<String> = HashSet::new();
        let mut report = SweepReport::default();

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping sweep");
                report.cancelled = true;
                break;
            }

            let next = match self
                .queue
                .peek_next_excluding(&self.settings.topic, &attempted, holder)
                .await
            {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read queue, ending sweep");
                    break;
                }
            };

            attempted.insert(next.key.clone());
            let outcome = self.deliver_one(&next.key, &invocation_id).await;
            report.record(&outcome);
        }

        self.compact_queue().await;

        info!(
            topic = %self.settings.topic,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            leased = report.leased,
            "Sweep finished"
        );
        report
    }

    async fn compact_queue(&self) {
        let threshold = self.settings.compact_after_lines;
        if threshold == 0 {
            return;
        }
        match self
            .queue
            .compact_if_needed(&self.settings.topic, threshold)
            .await
        {
            Ok(Some(kept)) => info!(kept, "Compacted queue log"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Queue compaction failed"),
        }
    }

    /// Per-artifact sequence shared by both invocation modes
    async fn deliver_one(&self, name: &str, holder: &str) -> DeliveryOutcome {
        let topic = &self.settings.topic;

        if let Some(ttl) = self.settings.lease {
            match self.queue.claim(topic, name, holder, ttl).await {
                Ok(ClaimResult::Claimed) => {}
                Ok(ClaimResult::HeldBy(other)) => {
                    debug!(artifact = %name, holder = %other, "Artifact leased elsewhere");
                    return DeliveryOutcome::Leased;
                }
                Ok(ClaimResult::Missing) => return DeliveryOutcome::NotQueued,
                Err(e) => return self.storage_failed(name, "claim", e),
            }
        }

        let outcome = self.run_sequence(name).await;

        if self.settings.lease.is_some() && outcome.is_retained() {
            if let Err(e) = self.queue.release(topic, name, holder).await {
                warn!(artifact = %name, error = %e, "Failed to release lease");
            }
        }

        outcome
    }

    async fn run_sequence(&self, name: &str) -> DeliveryOutcome {
        let topic = &self.settings.topic;

        let payload = match self.queue.retrieve(topic, name).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(artifact = %name, "Nothing queued");
                return DeliveryOutcome::NotQueued;
            }
            Err(e) => return self.storage_failed(name, "retrieve", e),
        };

        // Checking
        match self.terminal_namespace(name).await {
            Ok(Some(namespace)) => {
                info!(artifact = %name, %namespace, "Already terminal, skipping delivery");
                // The record outlives the endpoint's terminal folders
                if let Err(e) = self
                    .blobs
                    .put(&self.settings.skipped_namespace, name, namespace.as_bytes())
                    .await
                {
                    return self.storage_failed(name, "skip record", e);
                }
                return match self.queue.dequeue(topic, name).await {
                    Ok(_) => DeliveryOutcome::Skipped,
                    Err(e) => self.storage_failed(name, "dequeue", e),
                };
            }
            Ok(None) => {}
            Err(e) => return self.storage_failed(name, "terminal check", e),
        }

        // Delivering
        if let Err(e) = self
            .bounded(self.endpoint.upload(name, payload.as_bytes()))
            .await
        {
            return self.delivery_failed(name, &payload, e).await;
        }
        info!(artifact = %name, bytes = payload.len(), endpoint = self.endpoint.name(), "Delivered");

        // Archived, then Removed. Both run even if a racing invocation
        // already dequeued the entry.
        if let Err(e) = self
            .blobs
            .put(&self.settings.archive_namespace, name, payload.as_bytes())
            .await
        {
            return self.storage_failed(name, "archive", e);
        }

        match self.queue.dequeue(topic, name).await {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => self.storage_failed(name, "dequeue", e),
        }
    }

    /// First terminal namespace holding `name`, if any
    async fn terminal_namespace(&self, name: &str) -> Result<Option<&str>, EndpointError> {
        for namespace in [
            self.settings.processed_namespace.as_str(),
            self.settings.failed_namespace.as_str(),
        ] {
            if self.bounded(self.endpoint.exists(namespace, name)).await? {
                return Ok(Some(namespace));
            }
        }
        Ok(None)
    }

    async fn delivery_failed(
        &self,
        name: &str,
        payload: &str,
        error: EndpointError,
    ) -> DeliveryOutcome {
        let topic = &self.settings.topic;
        let message = error.to_string();

        let attempts = match self.queue.record_failure(topic, name, &message).await {
            Ok(attempts) => attempts,
            Err(e) => {
                warn!(artifact = %name, error = %e, "Failed to record attempt");
                None
            }
        };

        warn!(artifact = %name, error = %message, attempts = ?attempts, "Delivery failed, artifact retained");

        match (attempts, self.settings.max_attempts) {
            (Some(attempts), Some(max)) if attempts >= max => {
                self.dead_letter(name, payload, attempts).await
            }
            _ => DeliveryOutcome::DeliveryFailed { error: message },
        }
    }

    async fn dead_letter(&self, name: &str, payload: &str, attempts: u32) -> DeliveryOutcome {
        if let Err(e) = self
            .blobs
            .put(&self.settings.dead_letter_namespace, name, payload.as_bytes())
            .await
        {
            return self.storage_failed(name, "dead-letter write", e);
        }

        match self.queue.dequeue(&self.settings.topic, name).await {
            Ok(_) => {
                error!(artifact = %name, attempts, "Artifact dead-lettered");
                DeliveryOutcome::DeadLettered { attempts }
            }
            Err(e) => self.storage_failed(name, "dequeue", e),
        }
    }

    fn storage_failed(
        &self,
        name: &str,
        stage: &str,
        error: impl std::fmt::Display,
    ) -> DeliveryOutcome {
        error!(artifact = %name, %stage, error = %error, "Storage step failed, artifact retained");
        DeliveryOutcome::StorageFailed {
            error: format!("{}: {}", stage, error),
        }
    }

    /// Apply the per-call timeout to an endpoint call
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, EndpointError>>,
    ) -> Result<T, EndpointError> {
        let limit = self.settings.call_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(EndpointError::Timeout(limit)),
        }
    }
}
