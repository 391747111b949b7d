//! Service wiring.
//!
//! `serve` runs four loops until Ctrl-C:
//!
//! - HTTP admission (`POST /dispatch`)
//! - raw-event watcher → conversion stage
//! - single-item delivery trigger for each freshly queued artifact
//! - periodic sweep of the whole queue

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::adapters::build_endpoint;
use crate::config::ResolvedConfig;
use crate::core::{AdmissionGate, DeliveryOrchestrator, OrchestratorSettings, Transformer};
use crate::ingest::{ConversionStage, RawEventWatcher, WatcherConfig};
use crate::server::{build_router, AppState};
use crate::storage::{BlobStore, DurableQueue, FsBlobStore};

/// Pipeline components built from one configuration
#[derive(Clone)]
pub struct Services {
    pub config: ResolvedConfig,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: DurableQueue,
    pub gate: AdmissionGate,
    pub converter: ConversionStage,
}

impl Services {
    /// Build the storage-side components. The delivery endpoint is only
    /// built on demand, see [`Services::orchestrator`].
    pub fn new(config: &ResolvedConfig) -> Self {
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.blob_dir()));
        let queue = DurableQueue::new(config.queue_dir());
        let gate = AdmissionGate::new(blobs.clone(), config.namespaces.raw.clone());
        let converter = ConversionStage::new(
            blobs.clone(),
            queue.clone(),
            Transformer::from_overrides(&config.container_types),
            config,
        );

        Self {
            config: config.clone(),
            blobs,
            queue,
            gate,
            converter,
        }
    }

    /// Orchestrator delivering to the configured endpoint
    pub fn orchestrator(&self) -> Result<DeliveryOrchestrator> {
        let endpoint = build_endpoint(&self.config.endpoint)?;
        Ok(DeliveryOrchestrator::new(
            self.queue.clone(),
            endpoint,
            self.blobs.clone(),
            OrchestratorSettings::from_config(&self.config),
        ))
    }
}

/// Run the service until Ctrl-C
pub async fn serve(config: &ResolvedConfig) -> Result<()> {
    let report = config.preflight();
    if !report.passed() {
        anyhow::bail!(report.message());
    }

    let services = Services::new(config);
    let orchestrator = Arc::new(services.orchestrator()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (trigger_tx, trigger_rx) = mpsc::channel::<String>(256);

    let raw_dir = config.blob_dir().join(&config.namespaces.raw);
    let watcher = RawEventWatcher::new(WatcherConfig::new(&raw_dir));
    let (raw_rx, watch_handle) = watcher.watch().context("Failed to start raw-event watcher")?;

    let trigger_task = tokio::spawn(run_triggers(
        orchestrator.clone(),
        trigger_rx,
        shutdown_rx.clone(),
    ));
    let conversion_task = tokio::spawn(run_conversions(
        services.converter.clone(),
        raw_rx,
        trigger_tx,
        shutdown_rx.clone(),
    ));
    let sweep_task = tokio::spawn(run_sweeps(
        orchestrator.clone(),
        Duration::from_secs(config.delivery.sweep_interval_seconds.max(1)),
        shutdown_rx.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "Admission endpoint listening");

    let app = build_router(AppState::new(services.gate.clone()));
    let mut server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    server_task.await?.context("HTTP server failed")?;
    conversion_task.await?;
    trigger_task.await?;
    sweep_task.await?;
    watch_handle.stop().await?;

    info!("Stopped");
    Ok(())
}

/// Convert raw events as the watcher reports them, plus a catch-up pass for
/// events stored while the service was down.
async fn run_conversions(
    converter: ConversionStage,
    mut raw_rx: mpsc::Receiver<String>,
    trigger_tx: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    match converter.unconverted().await {
        Ok(keys) => {
            if !keys.is_empty() {
                info!(count = keys.len(), "Converting events stored while offline");
            }
            for key in keys {
                if *shutdown.borrow() {
                    return;
                }
                if let Some(name) = converter.handle(&key).await {
                    let _ = trigger_tx.send(name).await;
                }
            }
        }
        Err(e) => warn!(error = %e, "Catch-up scan failed"),
    }

    loop {
        tokio::select! {
            Some(key) = raw_rx.recv() => {
                if let Some(name) = converter.handle(&key).await {
                    let _ = trigger_tx.send(name).await;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_triggers(
    orchestrator: Arc<DeliveryOrchestrator>,
    mut trigger_rx: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            Some(name) = trigger_rx.recv() => {
                orchestrator.process_artifact(&name).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_sweeps(
    orchestrator: Arc<DeliveryOrchestrator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                orchestrator.sweep_until(shutdown.clone()).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}
