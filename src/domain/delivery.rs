//! Per-artifact delivery lifecycle.
//!
//! ```text
//! Queued → Checking → Skipped
//!                   → Delivering → Delivered → Archived → Removed
//!                                → DeliveryFailed (retained)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one artifact inside a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// Waiting in the queue
    Queued,

    /// Looking for a terminal marker at the endpoint
    Checking,

    /// A terminal marker exists; entry dropped without delivery
    Skipped,

    /// Transfer in progress
    Delivering,

    /// Endpoint confirmed the transfer
    Delivered,

    /// Archive copy written
    Archived,

    /// Queue entry removed
    Removed,

    /// Transfer failed; entry stays queued for the next invocation
    DeliveryFailed,
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Checking => "checking",
            Self::Skipped => "skipped",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Archived => "archived",
            Self::Removed => "removed",
            Self::DeliveryFailed => "delivery_failed",
        };
        f.write_str(s)
    }
}

/// What one `process_artifact` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered, archived and removed from the queue
    Delivered,

    /// Already terminal at the endpoint; dequeued without delivery
    Skipped,

    /// Nothing queued under this name (already handled elsewhere)
    NotQueued,

    /// Another invocation holds the lease on this entry
    Leased,

    /// Transfer failed; entry retained
    DeliveryFailed { error: String },

    /// Existence check, archive or queue bookkeeping failed; entry retained
    StorageFailed { error: String },

    /// Too many failed attempts; moved to the dead-letter namespace
    DeadLettered { attempts: u32 },
}

impl DeliveryOutcome {
    /// Final lifecycle state reached by this outcome
    pub fn state(&self) -> ArtifactState {
        match self {
            Self::Delivered | Self::DeadLettered { .. } => ArtifactState::Removed,
            Self::Skipped => ArtifactState::Skipped,
            Self::NotQueued | Self::Leased => ArtifactState::Queued,
            Self::DeliveryFailed { .. } | Self::StorageFailed { .. } => {
                ArtifactState::DeliveryFailed
            }
        }
    }

    /// True when the entry is still queued afterwards
    pub fn is_retained(&self) -> bool {
        matches!(
            self,
            Self::DeliveryFailed { .. } | Self::StorageFailed { .. } | Self::Leased
        )
    }
}

/// Tally of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub leased: usize,
    /// Set when a shutdown signal stopped the sweep early
    pub cancelled: bool,
}

impl SweepReport {
    /// Fold one outcome into the tally
    pub fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Skipped => self.skipped += 1,
            DeliveryOutcome::DeliveryFailed { .. } | DeliveryOutcome::StorageFailed { .. } => {
                self.failed += 1
            }
            DeliveryOutcome::DeadLettered { .. } => self.dead_lettered += 1,
            DeliveryOutcome::Leased => self.leased += 1,
            DeliveryOutcome::NotQueued => {}
        }
    }

    /// Artifacts this sweep looked at
    pub fn attempted(&self) -> usize {
        self.delivered + self.skipped + self.failed + self.dead_lettered + self.leased
    }
}
