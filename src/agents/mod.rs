//! Pipeline stage workers
//!
//! | Stage     | Reads                      | Writes             | Trigger          |
//! |-----------|----------------------------|--------------------|------------------|
//! | Validator | unclaimed raw events       | validation records | claim flag       |
//! | Redactor  | unclaimed validations      | redacted sessions  | claim flag       |
//! | Insight   | aggregate snapshot         | insights           | change detector  |
//!
//! The two claim-based stages share the cycle in [`worker`]; only their pure
//! transforms differ.

pub mod insights;
pub mod redactor;
pub mod validator;
mod worker;

pub use insights::{ChangeDetector, InsightAgent};
pub use redactor::{apply_redaction, Redaction, Redactor};
pub use validator::{validate_event, Issue, IssueKind, Validation, Validator};
pub use worker::{ClaimWorker, ClaimingStage, CycleReport, StageWorker, WorkerError};

use std::sync::Arc;

use crate::storage::EventStore;

/// Validator stage wired to `store`.
pub fn validator_worker(store: Arc<dyn EventStore>) -> ClaimWorker<Validator> {
    ClaimWorker::new(Validator::new(), store)
}

/// Redactor stage wired to `store`.
pub fn redactor_worker(store: Arc<dyn EventStore>) -> ClaimWorker<Redactor> {
    ClaimWorker::new(Redactor::new(), store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StatusBoard;
    use crate::storage::{InMemoryStore, StoreError};
    use crate::types::{
        Claim, Insight, NewEvent, NewInsight, NewRedaction, NewValidation, PendingRedaction,
        RawEvent, RedactedSession, Snapshot, Stage, ValidationRecord,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn event(session: &str, consent: bool) -> NewEvent {
        NewEvent {
            session_id: session.to_string(),
            event_type: "click".to_string(),
            page_url: "/x".to_string(),
            consent_given: consent,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_validator_cycle_claims_everything_once() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..3 {
            store.insert_event(event(&format!("s{i}"), i != 1)).unwrap();
        }
        let board = Arc::new(StatusBoard::new());
        let status = board.handle(Stage::Validator);
        let mut worker = validator_worker(store.clone());

        let report = worker.run_cycle(&status).await.unwrap();
        assert_eq!(report.polled, 3);
        assert_eq!(report.committed, 3);
        assert_eq!(
            board.messages()[&Stage::Validator],
            "Validated 3 events | Found 1 issues"
        );

        let second = worker.run_cycle(&status).await.unwrap();
        assert_eq!(second.polled, 0);
        assert_eq!(board.messages()[&Stage::Validator], "Monitoring for new events...");
        assert_eq!(store.latest_validations(10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_redactor_cycle_follows_validator() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_event(event("s1", false)).unwrap();
        let board = Arc::new(StatusBoard::new());

        let mut validator = validator_worker(store.clone());
        let mut redactor = redactor_worker(store.clone());

        // Nothing to redact before validation
        assert_eq!(redactor.run_cycle(&board.handle(Stage::Redactor)).await.unwrap().polled, 0);

        validator.run_cycle(&board.handle(Stage::Validator)).await.unwrap();
        let report = redactor.run_cycle(&board.handle(Stage::Redactor)).await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(redactor.stage_logic().sessions_redacted(), 1);
        assert_eq!(
            board.messages()[&Stage::Redactor],
            "Redacted 1 sessions | 0 PII fields masked"
        );
    }

    /// In-memory store with injectable faults: a failing claim, or a frozen
    /// poll result that keeps returning rows another worker already took.
    struct ScriptedStore {
        inner: InMemoryStore,
        fail_next_claim: AtomicBool,
        stale_events: Mutex<Option<Vec<RawEvent>>>,
    }

    impl ScriptedStore {
        fn new(fail_next_claim: bool) -> Self {
            Self {
                inner: InMemoryStore::new(),
                fail_next_claim: AtomicBool::new(fail_next_claim),
                stale_events: Mutex::new(None),
            }
        }

        fn freeze_unclaimed_events(&self) {
            let rows = self.inner.fetch_unclaimed_events().unwrap();
            *self.stale_events.lock().unwrap() = Some(rows);
        }
    }

    impl EventStore for ScriptedStore {
        fn insert_event(&self, event: NewEvent) -> Result<u64, StoreError> {
            self.inner.insert_event(event)
        }
        fn fetch_unclaimed_events(&self) -> Result<Vec<RawEvent>, StoreError> {
            if let Some(rows) = self.stale_events.lock().unwrap().clone() {
                return Ok(rows);
            }
            self.inner.fetch_unclaimed_events()
        }
        fn fetch_unclaimed_validations(&self) -> Result<Vec<PendingRedaction>, StoreError> {
            self.inner.fetch_unclaimed_validations()
        }
        fn claim(&self, stage: Stage, id: u64) -> Result<Claim, StoreError> {
            if self.fail_next_claim.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Storage("injected claim failure".to_string()));
            }
            self.inner.claim(stage, id)
        }
        fn insert_validation(&self, record: NewValidation) -> Result<u64, StoreError> {
            self.inner.insert_validation(record)
        }
        fn insert_redaction(&self, record: NewRedaction) -> Result<u64, StoreError> {
            self.inner.insert_redaction(record)
        }
        fn insert_insight(&self, insight: NewInsight) -> Result<u64, StoreError> {
            self.inner.insert_insight(insight)
        }
        fn snapshot(&self) -> Result<Snapshot, StoreError> {
            self.inner.snapshot()
        }
        fn latest_events(&self, limit: usize) -> Result<Vec<RawEvent>, StoreError> {
            self.inner.latest_events(limit)
        }
        fn latest_validations(&self, limit: usize) -> Result<Vec<ValidationRecord>, StoreError> {
            self.inner.latest_validations(limit)
        }
        fn latest_redactions(&self, limit: usize) -> Result<Vec<RedactedSession>, StoreError> {
            self.inner.latest_redactions(limit)
        }
        fn latest_insights(&self, limit: usize) -> Result<Vec<Insight>, StoreError> {
            self.inner.latest_insights(limit)
        }
        fn backend_name(&self) -> &'static str {
            "Scripted"
        }
    }

    #[tokio::test]
    async fn test_failed_claim_retries_without_duplicate() {
        let store = Arc::new(ScriptedStore::new(true));
        store.insert_event(event("s1", true)).unwrap();
        store.insert_event(event("s2", true)).unwrap();

        let board = Arc::new(StatusBoard::new());
        let status = board.handle(Stage::Validator);
        let mut worker = validator_worker(store.clone());

        let err = worker.run_cycle(&status).await.unwrap_err();
        assert!(matches!(err, WorkerError::Row { row_id: 1, .. }));
        // The second row waits for the next cycle
        assert_eq!(store.fetch_unclaimed_events().unwrap().len(), 2);

        let report = worker.run_cycle(&status).await.unwrap();
        assert_eq!(report.committed, 2);
        assert!(store.fetch_unclaimed_events().unwrap().is_empty());
        assert_eq!(store.latest_validations(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_worker_loses_race_without_duplicate() {
        let store = Arc::new(ScriptedStore::new(false));
        store.insert_event(event("s1", true)).unwrap();
        store.freeze_unclaimed_events();

        let board = Arc::new(StatusBoard::new());
        let status = board.handle(Stage::Validator);
        let mut first = validator_worker(store.clone());
        let mut second = validator_worker(store.clone());

        let won = first.run_cycle(&status).await.unwrap();
        assert_eq!(won.committed, 1);
        assert_eq!(won.lost_races, 0);

        // Same row still in the poll result, but the claim flag is already set
        let lost = second.run_cycle(&status).await.unwrap();
        assert_eq!(lost.polled, 1);
        assert_eq!(lost.committed, 0);
        assert_eq!(lost.lost_races, 1);
        assert_eq!(second.stage_logic().events_processed(), 0);

        assert_eq!(store.latest_validations(10).unwrap().len(), 1);
        assert!(store.inner.fetch_unclaimed_events().unwrap().is_empty());
    }
}
