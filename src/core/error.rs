//! Pipeline error taxonomy.

use thiserror::Error;

use crate::adapters::EndpointError;
use crate::storage::{BlobStoreError, QueueError};

/// Errors surfaced by pipeline components
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Submission is missing required fields; reported to the submitter
    #[error("Validation failed: missing {}", missing_fields.join(", "))]
    Validation { missing_fields: Vec<String> },

    /// An event with the same key was already admitted
    #[error("Event {key} already exists")]
    Conflict { key: String },

    /// The endpoint could not take the artifact right now
    #[error("Delivery failed: {0}")]
    TransientDelivery(#[from] EndpointError),

    /// Blob store or queue failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored data cannot be converted; never retried
    #[error("Malformed artifact {name}: {reason}")]
    MalformedArtifact { name: String, reason: String },
}

impl PipelineError {
    /// Whether the operation can succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientDelivery(_) | Self::Storage(_))
    }

    pub fn malformed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedArtifact {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<BlobStoreError> for PipelineError {
    fn from(e: BlobStoreError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<QueueError> for PipelineError {
    fn from(e: QueueError) -> Self {
        Self::Storage(e.to_string())
    }
}
