//! Storage collaborators for the pipeline.
//!
//! - Blob: namespaced key→blob store (raw events, archive, dead letters)
//! - Queue: per-topic durable work list with at-least-once visibility

pub mod blob;
pub mod queue;

pub use blob::{BlobStore, BlobStoreError, FsBlobStore};
pub use queue::{
    ClaimResult, DurableQueue, EnqueueResult, Lease, QueueEntry, QueueError, QueueStatus,
};
