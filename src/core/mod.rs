//! Core pipeline logic.
//!
//! This module contains:
//! - Validator: required-field checks on submissions
//! - Transformer: dispatch event → CSV rendering
//! - AdmissionGate: validated, write-once event storage
//! - DeliveryOrchestrator: queue draining with idempotent-skip

pub mod admission;
pub mod error;
pub mod orchestrator;
pub mod transformer;
pub mod validator;

// Re-export commonly used types
pub use admission::AdmissionGate;
pub use error::PipelineError;
pub use orchestrator::{DeliveryOrchestrator, OrchestratorSettings};
pub use transformer::{ContainerTypeMap, Transformer, CSV_HEADER};
pub use validator::{validate, validate_event, INVALID_JSON_PREFIX};
