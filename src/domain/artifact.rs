//! Converted artifacts awaiting delivery.
//!
//! An artifact is the CSV rendering of one dispatch event. Its name is
//! bound to the originating event key so every stage can find it again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::dispatch::RAW_EVENT_SUFFIX;

/// Suffix of a converted artifact
pub const ARTIFACT_SUFFIX: &str = ".csv";

/// A CSV artifact produced from a dispatch event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedArtifact {
    /// Artifact name, e.g. `dispatch_101_SO123456.csv`
    pub name: String,

    /// CSV text, header included
    pub content: String,

    /// When the conversion ran
    pub created_at: DateTime<Utc>,

    /// Size in bytes
    pub size_bytes: u64,
}

impl ConvertedArtifact {
    /// Create an artifact for a raw event key
    pub fn for_event(event_key: &str, content: String) -> Self {
        let size_bytes = content.len() as u64;
        Self {
            name: artifact_name(event_key),
            content,
            created_at: Utc::now(),
            size_bytes,
        }
    }

    /// Number of data rows (header excluded)
    pub fn row_count(&self) -> usize {
        self.content.lines().count().saturating_sub(1)
    }

    /// SHA256 of the content, hex encoded
    pub fn digest(&self) -> String {
        content_digest(&self.content)
    }
}

/// Derive the artifact name from a raw event key.
///
/// Only a trailing `.json` is replaced; a key without it gets `.csv`
/// appended.
pub fn artifact_name(event_key: &str) -> String {
    let stem = event_key
        .strip_suffix(RAW_EVENT_SUFFIX)
        .unwrap_or(event_key);
    format!("{}{}", stem, ARTIFACT_SUFFIX)
}

/// SHA256 of arbitrary payload text, hex encoded
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
