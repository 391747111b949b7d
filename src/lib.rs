//! dispatch-relay - Reliable dispatch-event delivery pipeline
//!
//! Accepts "ready for dispatch" events, converts each into a CSV artifact
//! and delivers it to a third-party logistics endpoint exactly once in
//! effect, archiving every delivered artifact.
//!
//! # Architecture
//!
//! ```text
//! POST /dispatch → AdmissionGate → raw-json/ → Watcher → ConversionStage
//!                                                         ↓
//!              dispatch-archive/ ← DeliveryOrchestrator ← processed-csv queue
//!                                          ↓
//!                                  DeliveryEndpoint
//! ```
//!
//! Delivery is at-least-once with an idempotent-skip: before uploading, the
//! orchestrator checks whether the endpoint already recorded a terminal
//! outcome for the artifact.
//!
//! # Modules
//!
//! - `adapters`: Delivery endpoints (directory drop, HTTP file service)
//! - `core`: Validator, Transformer, AdmissionGate, DeliveryOrchestrator
//! - `domain`: Data structures (DispatchEvent, ConvertedArtifact, outcomes)
//! - `storage`: Blob store and durable queue
//! - `ingest`: Raw-event watcher and conversion stage
//! - `server`: HTTP admission endpoint
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the service
//! dispatch-relay serve
//!
//! # Submit an event by hand and deliver it
//! dispatch-relay submit --input event.json --deliver
//!
//! # Drain the queue once
//! dispatch-relay sweep
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod server;
pub mod service;
pub mod storage;

// Re-export main types at crate root for convenience
pub use adapters::{DeliveryEndpoint, EndpointError};
pub use core::{
    validate, AdmissionGate, ContainerTypeMap, DeliveryOrchestrator, OrchestratorSettings,
    PipelineError, Transformer,
};
pub use domain::{ConvertedArtifact, DeliveryOutcome, DispatchEvent, SweepReport};
pub use storage::{BlobStore, DurableQueue, FsBlobStore};
