//! Domain types for the dispatch pipeline.
//!
//! This module contains the core data structures:
//! - Dispatch: submitted events (containers, items, address)
//! - Artifact: converted CSV output and its naming
//! - Delivery: per-artifact lifecycle states and outcomes

pub mod artifact;
pub mod delivery;
pub mod dispatch;

// Re-export commonly used types
pub use artifact::{artifact_name, content_digest, ConvertedArtifact, ARTIFACT_SUFFIX};
pub use delivery::{ArtifactState, DeliveryOutcome, SweepReport};
pub use dispatch::{Container, DeliveryAddress, DispatchEvent, Item, RAW_EVENT_SUFFIX};
