//! Aggregator — point-in-time summary statistics over the store
//!
//! Consumed by the insight stage on its own timer and by external dashboards.
//! Nothing here is persisted; every call recomputes from the tables.

use crate::storage::{EventStore, StoreError};
use crate::types::Snapshot;

/// Share of consented events as a percentage with one decimal.
///
/// Returns 0.0 when there are no events. Rounds the exact decimal value of
/// the float: `0.05000000000000000277` becomes `0.1`.
pub fn consent_percentage(consented: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let pct = consented as f64 / total as f64 * 100.0;
    format!("{pct:.1}").parse().unwrap_or(pct)
}

/// Compute the current snapshot from the store.
pub fn snapshot(store: &dyn EventStore) -> Result<Snapshot, StoreError> {
    let snap = store.snapshot()?;
    tracing::trace!(
        total = snap.total_events,
        consented = snap.consented_events,
        redacted = snap.redacted_sessions,
        issues = snap.issues_detected,
        "Snapshot computed"
    );
    Ok(snap)
}
