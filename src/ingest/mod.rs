//! Raw-event ingestion.
//!
//! Stored raw events are picked up by the watcher (or a catch-up scan),
//! converted to CSV and queued for delivery:
//!
//! ```text
//! raw-json/ → Watcher → ConversionStage → processed-csv queue → trigger
//! ```

pub mod converter;
pub mod watcher;

// Re-export key types
pub use converter::ConversionStage;
pub use watcher::{event_key, RawEventWatcher, WatchHandle, WatcherConfig, WatcherError};
