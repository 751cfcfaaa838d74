//! Point-in-time aggregate statistics over the store

use serde::{Deserialize, Serialize};

/// Derived view over all stored records. Recomputed on demand, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub total_events: u64,
    pub consented_events: u64,
    pub redacted_sessions: u64,
    /// Validation records whose status is not VALID
    pub issues_detected: u64,
    /// `consented / total * 100`, one decimal, 0 when there are no events
    pub consent_percentage: f64,
}

impl Snapshot {
    pub fn from_counts(
        total_events: u64,
        consented_events: u64,
        redacted_sessions: u64,
        issues_detected: u64,
    ) -> Self {
        Self {
            total_events,
            consented_events,
            redacted_sessions,
            issues_detected,
            consent_percentage: crate::aggregator::consent_percentage(consented_events, total_events),
        }
    }
}
