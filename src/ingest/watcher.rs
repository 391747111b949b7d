//! Raw-event watcher.
//!
//! Watches the raw-event namespace directory and emits the key of every new
//! stored event once its size has settled. Blob writes are published by
//! rename or hard link, so hidden temp files are ignored outright.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::RAW_EVENT_SUFFIX;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory of the raw-event namespace
    pub watch_path: PathBuf,

    /// How long a file must keep its size before it is reported
    pub stability_delay: Duration,

    /// Debounce window for filesystem notifications
    pub debounce: Duration,
}

impl WatcherConfig {
    pub fn new(watch_path: impl Into<PathBuf>) -> Self {
        Self {
            watch_path: watch_path.into(),
            stability_delay: Duration::from_secs(1),
            debounce: Duration::from_millis(500),
        }
    }
}

/// Emits raw-event keys as they appear
pub struct RawEventWatcher {
    config: WatcherConfig,
}

impl RawEventWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Start watching. Keys are sent on the returned channel until the
    /// handle is stopped.
    pub fn watch(&self) -> Result<(mpsc::Receiver<String>, WatchHandle), WatcherError> {
        // notify needs the directory to exist before it can watch it
        std::fs::create_dir_all(&self.config.watch_path)?;

        let (event_tx, event_rx) = mpsc::channel::<String>(100);
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        // The notify receiver blocks, so the loop gets its own thread
        let config = self.config.clone();
        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = run_watcher(config, event_tx, stop_rx) {
                tracing::error!(error = %e, "Watcher stopped with error");
            }
        });

        Ok((event_rx, WatchHandle { stop_tx, task }))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher and wait for its task
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Stored raw event key for a path, if the path is one
pub fn event_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') || !name.ends_with(RAW_EVENT_SUFFIX) {
        return None;
    }
    Some(name.to_string())
}

fn run_watcher(
    config: WatcherConfig,
    event_tx: mpsc::Sender<String>,
    mut stop_rx: mpsc::Receiver<()>,
) -> Result<(), WatcherError> {
    // path -> (size, last_seen)
    let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(config.debounce, tx)?;
    debouncer
        .watcher()
        .watch(&config.watch_path, RecursiveMode::NonRecursive)?;

    tracing::info!(path = %config.watch_path.display(), "Watching for raw events");

    loop {
        if stop_rx.try_recv().is_ok() {
            tracing::info!("Watcher stopping");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(events)) => {
                for event in events {
                    if event_key(&event.path).is_none() {
                        continue;
                    }
                    if let Ok(metadata) = std::fs::metadata(&event.path) {
                        if metadata.is_file() {
                            pending.insert(event.path, (metadata.len(), Instant::now()));
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, "Watcher error");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        }

        let now = Instant::now();
        let mut settled = Vec::new();

        for (path, (last_size, last_seen)) in pending.iter_mut() {
            if now.duration_since(*last_seen) < config.stability_delay {
                continue;
            }
            match std::fs::metadata(path) {
                Ok(metadata) if metadata.len() == *last_size => settled.push(path.clone()),
                Ok(metadata) => {
                    *last_size = metadata.len();
                    *last_seen = now;
                }
                // Removed before it settled
                Err(_) => settled.push(path.clone()),
            }
        }

        for path in settled {
            pending.remove(&path);
            if !path.exists() {
                continue;
            }
            if let Some(key) = event_key(&path) {
                tracing::debug!(%key, "Raw event detected");
                if event_tx.blocking_send(key).is_err() {
                    // Receiver gone, nobody is listening any more
                    return Ok(());
                }
            }
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    Ok(())
}
