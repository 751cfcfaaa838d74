//! Event Store — the shared durable store every stage reads and writes
//!
//! The store is the only synchronisation point between stage workers. Each
//! logical table has exactly one writer stage; the per-stage claim flag is a
//! compare-and-set so several workers per stage stay correct as well.
//!
//! Backends:
//! - `SledStore`: durable, embedded (default)
//! - `InMemoryStore`: single-lock in-memory store for tests and demos

mod memory;
mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use crate::types::{
    Claim, Insight, NewEvent, NewInsight, NewRedaction, NewValidation, PendingRedaction,
    RawEvent, RedactedSession, Snapshot, Stage, ValidationRecord,
};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: u64 },
    #[error("stage {0} does not consume claimable rows")]
    NotClaimable(Stage),
    #[error("corrupt key in {0}")]
    CorruptKey(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Contract between the stage workers, the aggregator and the store.
///
/// Implementations must be thread-safe (Send + Sync) and must never return a
/// half-written row. Listing methods return rows oldest first unless named
/// `latest_*`, which return newest first.
pub trait EventStore: Send + Sync {
    /// Persist an ingested event, returning its id.
    fn insert_event(&self, event: NewEvent) -> Result<u64, StoreError>;

    /// Raw events not yet claimed by the validator, in creation order.
    fn fetch_unclaimed_events(&self) -> Result<Vec<RawEvent>, StoreError>;

    /// Validation records not yet claimed by the redactor, joined with their
    /// source event's email, ip and consent, in creation order.
    fn fetch_unclaimed_validations(&self) -> Result<Vec<PendingRedaction>, StoreError>;

    /// Atomically flip the stage's claim flag on row `id` from false to true.
    fn claim(&self, stage: Stage, id: u64) -> Result<Claim, StoreError>;

    /// Persist a validation record. Idempotent per `event_id`: a second call
    /// for the same event returns the existing record's id.
    fn insert_validation(&self, record: NewValidation) -> Result<u64, StoreError>;

    /// Persist a redacted session. Idempotent per `validation_id`.
    fn insert_redaction(&self, record: NewRedaction) -> Result<u64, StoreError>;

    /// Append an insight.
    fn insert_insight(&self, insight: NewInsight) -> Result<u64, StoreError>;

    /// Aggregate counts across all tables.
    fn snapshot(&self) -> Result<Snapshot, StoreError>;

    fn latest_events(&self, limit: usize) -> Result<Vec<RawEvent>, StoreError>;

    fn latest_validations(&self, limit: usize) -> Result<Vec<ValidationRecord>, StoreError>;

    fn latest_redactions(&self, limit: usize) -> Result<Vec<RedactedSession>, StoreError>;

    fn latest_insights(&self, limit: usize) -> Result<Vec<Insight>, StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share. Each backend's test module runs
    //! these against a fresh instance.

    use super::*;
    use crate::types::{ComplianceStatus, ValidationStatus};

    pub fn event(session: &str, consent: bool) -> NewEvent {
        NewEvent {
            session_id: session.to_string(),
            event_type: "click".to_string(),
            page_url: "/x".to_string(),
            user_email: Some("a@b.com".to_string()),
            ip_address: Some("10.1.2.3".to_string()),
            consent_given: consent,
            encrypt_email: false,
        }
    }

    fn validation(event_id: u64, status: ValidationStatus) -> NewValidation {
        NewValidation {
            event_id,
            session_id: format!("s{event_id}"),
            status,
            issues: Vec::new(),
        }
    }

    fn redaction(validation_id: u64) -> NewRedaction {
        NewRedaction {
            validation_id,
            session_id: "s".to_string(),
            email_redacted: None,
            ip_redacted: None,
            event_count: 1,
            redaction_log: Vec::new(),
            compliance_status: ComplianceStatus::Compliant,
        }
    }

    pub fn unclaimed_in_creation_order(store: &dyn EventStore) {
        let a = store.insert_event(event("s1", true)).unwrap();
        let b = store.insert_event(event("s2", true)).unwrap();
        let c = store.insert_event(event("s3", false)).unwrap();
        assert!(a < b && b < c);

        let ids: Vec<u64> = store
            .fetch_unclaimed_events()
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    pub fn claim_is_exactly_once(store: &dyn EventStore) {
        let id = store.insert_event(event("s1", true)).unwrap();

        assert_eq!(store.claim(Stage::Validator, id).unwrap(), Claim::Claimed);
        assert_eq!(store.claim(Stage::Validator, id).unwrap(), Claim::AlreadyClaimed);
        assert!(store.fetch_unclaimed_events().unwrap().is_empty());
        assert!(store.latest_events(1).unwrap()[0].claimed_by_validator);
    }

    pub fn claim_unknown_row_fails(store: &dyn EventStore) {
        assert!(matches!(
            store.claim(Stage::Validator, 9_999),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.claim(Stage::Insight, 1),
            Err(StoreError::NotClaimable(Stage::Insight))
        ));
    }

    pub fn derived_inserts_are_idempotent(store: &dyn EventStore) {
        let event_id = store.insert_event(event("s1", true)).unwrap();

        let first = store.insert_validation(validation(event_id, ValidationStatus::Valid)).unwrap();
        let second = store.insert_validation(validation(event_id, ValidationStatus::Valid)).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.latest_validations(10).unwrap().len(), 1);

        let r1 = store.insert_redaction(redaction(first)).unwrap();
        let r2 = store.insert_redaction(redaction(first)).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(store.latest_redactions(10).unwrap().len(), 1);
    }

    pub fn pending_redaction_joins_source(store: &dyn EventStore) {
        let event_id = store.insert_event(event("s1", false)).unwrap();
        let vid = store.insert_validation(validation(event_id, ValidationStatus::Error)).unwrap();

        let pending = store.fetch_unclaimed_validations().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record.id, vid);
        assert_eq!(pending[0].user_email.as_deref(), Some("a@b.com"));
        assert_eq!(pending[0].ip_address.as_deref(), Some("10.1.2.3"));
        assert!(!pending[0].consent_given);

        assert_eq!(store.claim(Stage::Redactor, vid).unwrap(), Claim::Claimed);
        assert!(store.fetch_unclaimed_validations().unwrap().is_empty());
    }

    pub fn snapshot_counts(store: &dyn EventStore) {
        assert_eq!(store.snapshot().unwrap(), Snapshot::default());

        let e1 = store.insert_event(event("s1", true)).unwrap();
        let e2 = store.insert_event(event("s2", false)).unwrap();
        let _e3 = store.insert_event(event("s3", true)).unwrap();
        let v1 = store.insert_validation(validation(e1, ValidationStatus::Valid)).unwrap();
        store.insert_validation(validation(e2, ValidationStatus::Error)).unwrap();
        store.insert_redaction(redaction(v1)).unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.total_events, 3);
        assert_eq!(snap.consented_events, 2);
        assert_eq!(snap.redacted_sessions, 1);
        assert_eq!(snap.issues_detected, 1);
        assert_eq!(snap.consent_percentage, 66.7);
    }

    pub fn latest_is_newest_first(store: &dyn EventStore) {
        for i in 0..5 {
            store.insert_event(event(&format!("s{i}"), true)).unwrap();
        }
        for text in ["first", "second", "third"] {
            store
                .insert_insight(NewInsight {
                    insight_type: "REAL_TIME".to_string(),
                    text: text.to_string(),
                    related_sessions: None,
                })
                .unwrap();
        }

        let events = store.latest_events(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].session_id, "s4");
        assert_eq!(events[1].session_id, "s3");

        let insights = store.latest_insights(5).unwrap();
        let texts: Vec<&str> = insights.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);
    }
}
