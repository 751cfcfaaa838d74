//! Sled-backed event store
//!
//! Layout (one sled tree per table, keys are big-endian u64 ids so iteration
//! order is creation order):
//!
//! | Tree                      | Key             | Value                   |
//! |---------------------------|-----------------|-------------------------|
//! | `raw_events`              | event id        | JSON `RawEvent`         |
//! | `validations`             | validation id   | JSON `ValidationRecord` |
//! | `redactions`              | redaction id    | JSON `RedactedSession`  |
//! | `insights`                | insight id      | JSON `Insight`          |
//! | `pending_validator`       | event id        | empty                   |
//! | `pending_redactor`        | validation id   | empty                   |
//! | `validation_by_event`     | event id        | validation id           |
//! | `redaction_by_validation` | validation id   | redaction id            |
//!
//! Claims and derived inserts run as multi-tree transactions, so the claim
//! flag, the pending index and the dedup index never disagree.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{IVec, Transactional, Tree};
use tracing::{info, warn};

use super::{EventStore, StoreError};
use crate::types::{
    Claim, Insight, NewEvent, NewInsight, NewRedaction, NewValidation, PendingRedaction,
    RawEvent, RedactedSession, Snapshot, Stage, ValidationRecord, ValidationStatus,
};

fn key(id: u64) -> IVec {
    IVec::from(&id.to_be_bytes()[..])
}

fn decode_key(table: &'static str, raw: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| StoreError::CorruptKey(table))?;
    Ok(u64::from_be_bytes(bytes))
}

fn abort<E: Into<StoreError>>(e: E) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(e.into())
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

/// Durable event store on an embedded sled database.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    raw_events: Tree,
    validations: Tree,
    redactions: Tree,
    insights: Tree,
    pending_validator: Tree,
    pending_redactor: Tree,
    validation_by_event: Tree,
    redaction_by_validation: Tree,
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        info!("Event store opened at {:?}", path_ref);
        Self::from_db(db)
    }

    /// Open with an explicit background flush interval in milliseconds.
    pub fn open_with_flush_interval<P: AsRef<Path>>(
        path: P,
        flush_every_ms: u64,
    ) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::Config::new()
            .path(path_ref)
            .flush_every_ms(Some(flush_every_ms))
            .open()?;
        info!("Event store opened at {:?} (flush every {}ms)", path_ref, flush_every_ms);
        Self::from_db(db)
    }

    /// Open a throwaway store that is deleted when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            raw_events: db.open_tree("raw_events")?,
            validations: db.open_tree("validations")?,
            redactions: db.open_tree("redactions")?,
            insights: db.open_tree("insights")?,
            pending_validator: db.open_tree("pending_validator")?,
            pending_redactor: db.open_tree("pending_redactor")?,
            validation_by_event: db.open_tree("validation_by_event")?,
            redaction_by_validation: db.open_tree("redaction_by_validation")?,
            db: Arc::new(db),
        })
    }

    /// Flush dirty pages to disk. Called on shutdown.
    pub fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.db.flush()?)
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        // generate_id starts at 0; ids are 1-based so 0 never names a row
        Ok(self.db.generate_id()? + 1)
    }

    fn get_row<T: DeserializeOwned>(
        tree: &Tree,
        table: &'static str,
        id: u64,
    ) -> Result<Option<T>, StoreError> {
        match tree.get(key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => {
                tracing::trace!(table, id, "row not found");
                Ok(None)
            }
        }
    }

    fn latest<T: DeserializeOwned>(tree: &Tree, limit: usize) -> Result<Vec<T>, StoreError> {
        let mut rows = Vec::with_capacity(limit.min(64));
        for item in tree.iter().rev().take(limit) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    /// Flip a JSON row's claim flag inside a transaction.
    ///
    /// `mark` returns false when the row is already claimed.
    fn claim_in<T, F>(
        rows: &Tree,
        pending: &Tree,
        table: &'static str,
        id: u64,
        mark: F,
    ) -> Result<Claim, StoreError>
    where
        T: serde::Serialize + DeserializeOwned,
        F: Fn(&mut T) -> bool,
    {
        let claim = (rows, pending).transaction(
            |(rows, pending)| -> ConflictableTransactionResult<Claim, StoreError> {
                let Some(bytes) = rows.get(key(id))? else {
                    return Err(abort(StoreError::NotFound { table, id }));
                };
                let mut row: T = serde_json::from_slice(&bytes).map_err(abort)?;
                if !mark(&mut row) {
                    pending.remove(key(id))?;
                    return Ok(Claim::AlreadyClaimed);
                }
                let updated = serde_json::to_vec(&row).map_err(abort)?;
                rows.insert(key(id), updated)?;
                pending.remove(key(id))?;
                Ok(Claim::Claimed)
            },
        )?;
        Ok(claim)
    }
}

impl EventStore for SledStore {
    fn insert_event(&self, event: NewEvent) -> Result<u64, StoreError> {
        let id = self.next_id()?;
        let row = RawEvent::from_new(id, event, Utc::now());
        let value = serde_json::to_vec(&row)?;

        (&self.raw_events, &self.pending_validator).transaction(
            |(raw, pending)| -> ConflictableTransactionResult<(), StoreError> {
                raw.insert(key(id), value.as_slice())?;
                pending.insert(key(id), &b""[..])?;
                Ok(())
            },
        )?;

        tracing::debug!(event_id = id, session_id = %row.session_id, "Stored raw event");
        Ok(id)
    }

    fn fetch_unclaimed_events(&self) -> Result<Vec<RawEvent>, StoreError> {
        let mut events = Vec::new();
        for item in self.pending_validator.iter() {
            let (k, _) = item?;
            let id = decode_key("pending_validator", &k)?;
            match Self::get_row::<RawEvent>(&self.raw_events, "raw_events", id)? {
                // Claimed between the index scan and the row read
                Some(event) if event.claimed_by_validator => {}
                Some(event) => events.push(event),
                None => warn!(event_id = id, "Pending index points at a missing raw event"),
            }
        }
        Ok(events)
    }

    fn fetch_unclaimed_validations(&self) -> Result<Vec<PendingRedaction>, StoreError> {
        let mut pending = Vec::new();
        for item in self.pending_redactor.iter() {
            let (k, _) = item?;
            let id = decode_key("pending_redactor", &k)?;
            let Some(record) =
                Self::get_row::<ValidationRecord>(&self.validations, "validations", id)?
            else {
                warn!(validation_id = id, "Pending index points at a missing validation record");
                continue;
            };
            if record.claimed_by_redactor {
                continue;
            }
            let Some(source) =
                Self::get_row::<RawEvent>(&self.raw_events, "raw_events", record.event_id)?
            else {
                warn!(
                    validation_id = id,
                    event_id = record.event_id,
                    "Validation record has no source event, skipping"
                );
                continue;
            };
            pending.push(PendingRedaction {
                record,
                user_email: source.user_email,
                ip_address: source.ip_address,
                consent_given: source.consent_given,
            });
        }
        Ok(pending)
    }

    fn claim(&self, stage: Stage, id: u64) -> Result<Claim, StoreError> {
        match stage {
            Stage::Validator => Self::claim_in(
                &self.raw_events,
                &self.pending_validator,
                "raw_events",
                id,
                |row: &mut RawEvent| {
                    if row.claimed_by_validator {
                        return false;
                    }
                    row.claimed_by_validator = true;
                    true
                },
            ),
            Stage::Redactor => Self::claim_in(
                &self.validations,
                &self.pending_redactor,
                "validations",
                id,
                |row: &mut ValidationRecord| {
                    if row.claimed_by_redactor {
                        return false;
                    }
                    row.claimed_by_redactor = true;
                    true
                },
            ),
            Stage::Insight => Err(StoreError::NotClaimable(stage)),
        }
    }

    fn insert_validation(&self, record: NewValidation) -> Result<u64, StoreError> {
        let event_id = record.event_id;
        let id = self.next_id()?;
        let row = ValidationRecord::from_new(id, record, Utc::now());
        let value = serde_json::to_vec(&row)?;

        let stored = (&self.validations, &self.validation_by_event, &self.pending_redactor)
            .transaction(
                |(rows, by_event, pending)| -> ConflictableTransactionResult<u64, StoreError> {
                    if let Some(existing) = by_event.get(key(event_id))? {
                        return decode_key("validation_by_event", &existing).map_err(abort);
                    }
                    rows.insert(key(id), value.as_slice())?;
                    by_event.insert(key(event_id), key(id))?;
                    pending.insert(key(id), &b""[..])?;
                    Ok(id)
                },
            )?;

        if stored != id {
            tracing::debug!(event_id, validation_id = stored, "Validation already recorded");
        }
        Ok(stored)
    }

    fn insert_redaction(&self, record: NewRedaction) -> Result<u64, StoreError> {
        let validation_id = record.validation_id;
        let id = self.next_id()?;
        let row = RedactedSession::from_new(id, record, Utc::now());
        let value = serde_json::to_vec(&row)?;

        let stored = (&self.redactions, &self.redaction_by_validation).transaction(
            |(rows, by_validation)| -> ConflictableTransactionResult<u64, StoreError> {
                if let Some(existing) = by_validation.get(key(validation_id))? {
                    return decode_key("redaction_by_validation", &existing).map_err(abort);
                }
                rows.insert(key(id), value.as_slice())?;
                by_validation.insert(key(validation_id), key(id))?;
                Ok(id)
            },
        )?;

        if stored != id {
            tracing::debug!(validation_id, redaction_id = stored, "Redaction already recorded");
        }
        Ok(stored)
    }

    fn insert_insight(&self, insight: NewInsight) -> Result<u64, StoreError> {
        let id = self.next_id()?;
        let row = Insight::from_new(id, insight, Utc::now());
        self.insights.insert(key(id), serde_json::to_vec(&row)?)?;
        Ok(id)
    }

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let mut total_events = 0u64;
        let mut consented_events = 0u64;
        for item in self.raw_events.iter() {
            let (_key, value) = item?;
            let event: RawEvent = serde_json::from_slice(&value)?;
            total_events += 1;
            if event.consent_given {
                consented_events += 1;
            }
        }

        let mut issues_detected = 0u64;
        for item in self.validations.iter() {
            let (_key, value) = item?;
            let record: ValidationRecord = serde_json::from_slice(&value)?;
            if record.status != ValidationStatus::Valid {
                issues_detected += 1;
            }
        }

        let redacted_sessions = self.redactions.len() as u64;

        Ok(Snapshot::from_counts(
            total_events,
            consented_events,
            redacted_sessions,
            issues_detected,
        ))
    }

    fn latest_events(&self, limit: usize) -> Result<Vec<RawEvent>, StoreError> {
        Self::latest(&self.raw_events, limit)
    }

    fn latest_validations(&self, limit: usize) -> Result<Vec<ValidationRecord>, StoreError> {
        Self::latest(&self.validations, limit)
    }

    fn latest_redactions(&self, limit: usize) -> Result<Vec<RedactedSession>, StoreError> {
        Self::latest(&self.redactions, limit)
    }

    fn latest_insights(&self, limit: usize) -> Result<Vec<Insight>, StoreError> {
        Self::latest(&self.insights, limit)
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}
