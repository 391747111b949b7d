//! JSONL-based durable queue, one log per topic.
//!
//! Follows the EventStore pattern: append-only JSONL with state derived from
//! replay. Every state change (enqueue, claim, failure, removal) is appended as
//! a new line. Mutations hold an exclusive `fs2` lock on a sidecar lock file
//! so that read-then-append sequences are atomic across processes; the lock
//! file is never replaced, which keeps it valid across compaction.
//!
//! Delivery is at-least-once: an entry stays visible to `peek_next` until it
//! is explicitly dequeued.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::content_digest;
use crate::storage::blob::validate_key;

/// Errors that can occur with the durable queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid topic or key: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// An event in a topic log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// Entry key (artifact name)
    pub key: String,

    /// Type of queue event
    pub event_type: QueueEventType,

    /// Additional data (depends on event type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Types of queue events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// Entry written (replaces any live entry under the same key)
    Enqueued,

    /// Entry leased by one consumer until an expiry
    Claimed,

    /// Lease given back
    Released,

    /// A delivery attempt failed
    AttemptFailed,

    /// Entry acknowledged and removed
    Dequeued,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnqueuedData {
    payload: String,
    digest: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaimedData {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// A time-bounded reservation of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A live queue entry (derived from replaying events)
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub topic: String,

    /// Artifact name
    pub key: String,

    /// Artifact content
    pub payload: String,

    /// SHA256 of the payload
    pub digest: String,

    pub enqueued_at: DateTime<Utc>,

    /// Failed delivery attempts since the last enqueue
    pub attempts: u32,

    pub last_error: Option<String>,

    pub lease: Option<Lease>,
}

impl QueueEntry {
    /// True if someone other than `holder` holds an unexpired lease
    pub fn is_leased_by_other(&self, holder: Option<&str>, now: DateTime<Utc>) -> bool {
        match &self.lease {
            Some(lease) if lease.is_active(now) => Some(lease.holder.as_str()) != holder,
            _ => false,
        }
    }
}

/// Result of enqueueing an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// New entry
    Queued(String),

    /// A live entry under this key was replaced (last write wins)
    Replaced(String),
}

impl EnqueueResult {
    pub fn key(&self) -> &str {
        match self {
            Self::Queued(key) | Self::Replaced(key) => key,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Result of trying to lease an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    HeldBy(String),
    Missing,
}

/// Queue status summary
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub leased: usize,
    /// Entries with at least one failed attempt
    pub failing: usize,
    pub oldest: Option<DateTime<Utc>>,
}

impl QueueStatus {
    pub fn total(&self) -> usize {
        self.pending + self.leased
    }
}

/// Durable multi-topic queue rooted at a directory
#[derive(Debug, Clone)]
pub struct DurableQueue {
    root: PathBuf,
}

impl DurableQueue {
    /// Create a queue rooted at `root` (`<root>/<topic>.jsonl`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn topic_log(&self, topic: &str) -> Result<TopicLog, QueueError> {
        validate_name(topic)?;
        Ok(TopicLog {
            topic: topic.to_string(),
            log_path: self.root.join(format!("{}.jsonl", topic)),
            lock_path: self.root.join(format!("{}.lock", topic)),
        })
    }

    /// Run `op` on a topic log under the exclusive lock, off the async runtime
    async fn with_exclusive<T, F>(&self, topic: &str, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&TopicLog) -> Result<T, QueueError> + Send + 'static,
    {
        let log = self.topic_log(topic)?;
        tokio::task::spawn_blocking(move || {
            let _lock = log.lock(true)?;
            op(&log)
        })
        .await?
    }

    /// Replay a topic under a shared lock
    async fn snapshot(&self, topic: &str) -> Result<HashMap<String, QueueEntry>, QueueError> {
        let log = self.topic_log(topic)?;
        tokio::task::spawn_blocking(move || {
            let _lock = log.lock(false)?;
            log.replay()
        })
        .await?
    }

    /// Enqueue a payload under `key`; last write wins
    pub async fn enqueue(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<EnqueueResult, QueueError> {
        validate_name(key)?;
        let key = key.to_string();
        let data = serde_json::to_value(EnqueuedData {
            digest: content_digest(payload),
            payload: payload.to_string(),
        })?;

        self.with_exclusive(topic, move |log| {
            let existed = log.replay()?.contains_key(&key);
            log.append(&QueueEvent {
                timestamp: Utc::now(),
                key: key.clone(),
                event_type: QueueEventType::Enqueued,
                data: Some(data),
            })?;

            Ok(if existed {
                EnqueueResult::Replaced(key)
            } else {
                EnqueueResult::Queued(key)
            })
        })
        .await
    }

    /// Oldest entry that is not leased by another consumer
    pub async fn peek_next(&self, topic: &str) -> Result<Option<QueueEntry>, QueueError> {
        self.peek_next_excluding(topic, &HashSet::new(), None).await
    }

    /// Like [`peek_next`](Self::peek_next), skipping keys in `skip` and
    /// entries leased by anyone other than `holder`.
    pub async fn peek_next_excluding(
        &self,
        topic: &str,
        skip: &HashSet<String>,
        holder: Option<&str>,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let now = Utc::now();
        let entries = self.snapshot(topic).await?;

        Ok(entries
            .into_values()
            .filter(|e| !skip.contains(&e.key) && !e.is_leased_by_other(holder, now))
            .min_by(|a, b| {
                a.enqueued_at
                    .cmp(&b.enqueued_at)
                    .then_with(|| a.key.cmp(&b.key))
            }))
    }

    /// Fetch an entry by key without side effects
    pub async fn get(&self, topic: &str, key: &str) -> Result<Option<QueueEntry>, QueueError> {
        validate_name(key)?;
        Ok(self.snapshot(topic).await?.remove(key))
    }

    /// Fetch a payload by key without side effects
    pub async fn retrieve(&self, topic: &str, key: &str) -> Result<Option<String>, QueueError> {
        Ok(self.get(topic, key).await?.map(|e| e.payload))
    }

    /// Permanently remove an entry. Removing an absent key is a no-op and
    /// returns `false`.
    pub async fn dequeue(&self, topic: &str, key: &str) -> Result<bool, QueueError> {
        validate_name(key)?;
        let key = key.to_string();

        self.with_exclusive(topic, move |log| {
            if !log.replay()?.contains_key(&key) {
                return Ok(false);
            }
            log.append(&QueueEvent {
                timestamp: Utc::now(),
                key,
                event_type: QueueEventType::Dequeued,
                data: None,
            })?;
            Ok(true)
        })
        .await
    }

    /// Record a failed delivery attempt. Returns the new attempt count, or
    /// `None` if the entry is gone.
    pub async fn record_failure(
        &self,
        topic: &str,
        key: &str,
        error: &str,
    ) -> Result<Option<u32>, QueueError> {
        validate_name(key)?;
        let key = key.to_string();
        let error = error.to_string();

        self.with_exclusive(topic, move |log| {
            let attempts = match log.replay()?.get(&key) {
                Some(entry) => entry.attempts + 1,
                None => return Ok(None),
            };
            log.append(&QueueEvent {
                timestamp: Utc::now(),
                key,
                event_type: QueueEventType::AttemptFailed,
                data: Some(serde_json::json!({ "error": error })),
            })?;
            Ok(Some(attempts))
        })
        .await
    }

    /// Lease an entry to `holder` for `ttl`. An expired lease, or one already
    /// held by `holder`, can be taken over.
    pub async fn claim(
        &self,
        topic: &str,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<ClaimResult, QueueError> {
        validate_name(key)?;
        let key = key.to_string();
        let holder = holder.to_string();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        self.with_exclusive(topic, move |log| {
            let now = Utc::now();
            let entries = log.replay()?;
            let Some(entry) = entries.get(&key) else {
                return Ok(ClaimResult::Missing);
            };

            if entry.is_leased_by_other(Some(&holder), now) {
                let current = entry
                    .lease
                    .as_ref()
                    .map(|l| l.holder.clone())
                    .unwrap_or_default();
                return Ok(ClaimResult::HeldBy(current));
            }

            log.append(&QueueEvent {
                timestamp: now,
                key,
                event_type: QueueEventType::Claimed,
                data: Some(serde_json::to_value(ClaimedData {
                    holder,
                    expires_at: now + ttl,
                })?),
            })?;
            Ok(ClaimResult::Claimed)
        })
        .await
    }

    /// Give back a lease held by `holder`. Other holders' leases are left alone.
    pub async fn release(&self, topic: &str, key: &str, holder: &str) -> Result<(), QueueError> {
        validate_name(key)?;
        let key = key.to_string();
        let holder = holder.to_string();

        self.with_exclusive(topic, move |log| {
            let held = log
                .replay()?
                .get(&key)
                .and_then(|e| e.lease.as_ref())
                .map(|l| l.holder == holder)
                .unwrap_or(false);

            if held {
                log.append(&QueueEvent {
                    timestamp: Utc::now(),
                    key,
                    event_type: QueueEventType::Released,
                    data: None,
                })?;
            }
            Ok(())
        })
        .await
    }

    /// All live entries, oldest first
    pub async fn list(&self, topic: &str) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries: Vec<QueueEntry> = self.snapshot(topic).await?.into_values().collect();
        entries.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries)
    }

    /// Get queue status summary
    pub async fn status(&self, topic: &str) -> Result<QueueStatus, QueueError> {
        let now = Utc::now();
        let entries = self.snapshot(topic).await?;

        let mut status = QueueStatus::default();
        for entry in entries.values() {
            if entry.lease.as_ref().map(|l| l.is_active(now)).unwrap_or(false) {
                status.leased += 1;
            } else {
                status.pending += 1;
            }
            if entry.attempts > 0 {
                status.failing += 1;
            }
            status.oldest = match status.oldest {
                Some(oldest) if oldest <= entry.enqueued_at => Some(oldest),
                _ => Some(entry.enqueued_at),
            };
        }

        Ok(status)
    }

    /// Rewrite a topic log with only its live entries. Returns the number of
    /// entries kept.
    pub async fn compact(&self, topic: &str) -> Result<usize, QueueError> {
        self.with_exclusive(topic, |log| log.compact()).await
    }

    /// Compact once the log holds at least `min_dead_lines` superseded
    /// lines. Returns the number of entries kept when it rewrote the log.
    pub async fn compact_if_needed(
        &self,
        topic: &str,
        min_dead_lines: usize,
    ) -> Result<Option<usize>, QueueError> {
        self.with_exclusive(topic, move |log| {
            let dead = log.dead_lines()?;
            if dead == 0 || dead < min_dead_lines {
                return Ok(None);
            }
            log.compact().map(Some)
        })
        .await
    }
}

/// File handles for one topic
struct TopicLog {
    topic: String,
    log_path: PathBuf,
    lock_path: PathBuf,
}

impl TopicLog {
    /// Acquire the topic lock; released when the returned file is dropped
    fn lock(&self, exclusive: bool) -> Result<File, QueueError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;

        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(file)
    }

    fn append(&self, event: &QueueEvent) -> Result<(), QueueError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.log_path)?;

        // Terminate a torn trailing line so this event starts on its own line
        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                file.write_all(b"\n")?;
            }
        }

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        file.sync_data()?;

        Ok(())
    }

    /// Replay all events to build current state
    fn replay(&self) -> Result<HashMap<String, QueueEntry>, QueueError> {
        let mut entries = HashMap::new();

        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            // A torn trailing write must not wedge the whole topic
            match serde_json::from_str::<QueueEvent>(&line) {
                Ok(event) => self.apply_event(&mut entries, event),
                Err(e) => tracing::warn!(
                    topic = %self.topic,
                    line = line_no + 1,
                    error = %e,
                    "Skipping unreadable queue log line"
                ),
            }
        }

        Ok(entries)
    }

    /// Apply a single event to the state
    fn apply_event(&self, entries: &mut HashMap<String, QueueEntry>, event: QueueEvent) {
        match event.event_type {
            QueueEventType::Enqueued => {
                let Some(data) = event.data else { return };
                if let Ok(data) = serde_json::from_value::<EnqueuedData>(data) {
                    entries.insert(
                        event.key.clone(),
                        QueueEntry {
                            topic: self.topic.clone(),
                            key: event.key,
                            payload: data.payload,
                            digest: data.digest,
                            enqueued_at: event.timestamp,
                            attempts: 0,
                            last_error: None,
                            lease: None,
                        },
                    );
                }
            }
            QueueEventType::Claimed => {
                let Some(entry) = entries.get_mut(&event.key) else { return };
                if let Some(Ok(data)) = event.data.map(serde_json::from_value::<ClaimedData>) {
                    entry.lease = Some(Lease {
                        holder: data.holder,
                        expires_at: data.expires_at,
                    });
                }
            }
            QueueEventType::Released => {
                if let Some(entry) = entries.get_mut(&event.key) {
                    entry.lease = None;
                }
            }
            QueueEventType::AttemptFailed => {
                if let Some(entry) = entries.get_mut(&event.key) {
                    entry.attempts += 1;
                    entry.last_error = event
                        .data
                        .as_ref()
                        .and_then(|d| d.get("error"))
                        .and_then(|e| e.as_str())
                        .map(str::to_string);
                }
            }
            QueueEventType::Dequeued => {
                entries.remove(&event.key);
            }
        }
    }

    /// Lines that a compaction would drop
    fn dead_lines(&self) -> Result<usize, QueueError> {
        let total = match File::open(&self.log_path) {
            Ok(file) => BufReader::new(file)
                .lines()
                .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
                .count(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut live = 0;
        for entry in self.replay()?.values() {
            live += entry_events(entry)?.len();
        }
        Ok(total.saturating_sub(live))
    }

    fn compact(&self) -> Result<usize, QueueError> {
        let mut entries: Vec<QueueEntry> = self.replay()?.into_values().collect();
        entries.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));

        let temp_path = self.log_path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&temp_path)?;
            for entry in &entries {
                for event in entry_events(entry)? {
                    writeln!(file, "{}", serde_json::to_string(&event)?)?;
                }
            }
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.log_path)?;

        Ok(entries.len())
    }
}

/// Minimal event sequence that replays to `entry`
fn entry_events(entry: &QueueEntry) -> Result<Vec<QueueEvent>, QueueError> {
    let mut events = vec![QueueEvent {
        timestamp: entry.enqueued_at,
        key: entry.key.clone(),
        event_type: QueueEventType::Enqueued,
        data: Some(serde_json::to_value(EnqueuedData {
            payload: entry.payload.clone(),
            digest: entry.digest.clone(),
        })?),
    }];

    for attempt in 0..entry.attempts {
        let error = if attempt + 1 == entry.attempts {
            entry.last_error.clone()
        } else {
            None
        };
        events.push(QueueEvent {
            timestamp: entry.enqueued_at,
            key: entry.key.clone(),
            event_type: QueueEventType::AttemptFailed,
            data: Some(serde_json::json!({ "error": error })),
        });
    }

    if let Some(lease) = &entry.lease {
        events.push(QueueEvent {
            timestamp: entry.enqueued_at,
            key: entry.key.clone(),
            event_type: QueueEventType::Claimed,
            data: Some(serde_json::to_value(ClaimedData {
                holder: lease.holder.clone(),
                expires_at: lease.expires_at,
            })?),
        });
    }

    Ok(events)
}

fn validate_name(name: &str) -> Result<(), QueueError> {
    validate_key(name).map_err(|_| QueueError::InvalidName(name.to_string()))
}
