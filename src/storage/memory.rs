//! In-memory event store for tests and minimal deployments
//!
//! All tables sit behind a single `RwLock`, so every operation is atomic with
//! respect to every other. Not durable — data lost on restart.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;

use super::{EventStore, StoreError};
use crate::types::{
    Claim, Insight, NewEvent, NewInsight, NewRedaction, NewValidation, PendingRedaction,
    RawEvent, RedactedSession, Snapshot, Stage, ValidationRecord, ValidationStatus,
};

#[derive(Default)]
struct Tables {
    next_id: u64,
    raw_events: BTreeMap<u64, RawEvent>,
    validations: BTreeMap<u64, ValidationRecord>,
    redactions: BTreeMap<u64, RedactedSession>,
    insights: BTreeMap<u64, Insight>,
    validation_by_event: BTreeMap<u64, u64>,
    redaction_by_validation: BTreeMap<u64, u64>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }
}

fn newest<T: Clone>(rows: &BTreeMap<u64, T>, limit: usize) -> Vec<T> {
    rows.values().rev().take(limit).cloned().collect()
}

impl EventStore for InMemoryStore {
    fn insert_event(&self, event: NewEvent) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let id = tables.next_id();
        tables
            .raw_events
            .insert(id, RawEvent::from_new(id, event, Utc::now()));
        Ok(id)
    }

    fn fetch_unclaimed_events(&self) -> Result<Vec<RawEvent>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .raw_events
            .values()
            .filter(|e| !e.claimed_by_validator)
            .cloned()
            .collect())
    }

    fn fetch_unclaimed_validations(&self) -> Result<Vec<PendingRedaction>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .validations
            .values()
            .filter(|v| !v.claimed_by_redactor)
            .filter_map(|v| {
                tables.raw_events.get(&v.event_id).map(|source| PendingRedaction {
                    record: v.clone(),
                    user_email: source.user_email.clone(),
                    ip_address: source.ip_address.clone(),
                    consent_given: source.consent_given,
                })
            })
            .collect())
    }

    fn claim(&self, stage: Stage, id: u64) -> Result<Claim, StoreError> {
        let mut tables = self.write()?;
        let flag = match stage {
            Stage::Validator => tables
                .raw_events
                .get_mut(&id)
                .map(|e| &mut e.claimed_by_validator)
                .ok_or(StoreError::NotFound { table: "raw_events", id })?,
            Stage::Redactor => tables
                .validations
                .get_mut(&id)
                .map(|v| &mut v.claimed_by_redactor)
                .ok_or(StoreError::NotFound { table: "validations", id })?,
            Stage::Insight => return Err(StoreError::NotClaimable(stage)),
        };

        if *flag {
            return Ok(Claim::AlreadyClaimed);
        }
        *flag = true;
        Ok(Claim::Claimed)
    }

    fn insert_validation(&self, record: NewValidation) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        if let Some(existing) = tables.validation_by_event.get(&record.event_id) {
            return Ok(*existing);
        }
        let id = tables.next_id();
        tables.validation_by_event.insert(record.event_id, id);
        tables
            .validations
            .insert(id, ValidationRecord::from_new(id, record, Utc::now()));
        Ok(id)
    }

    fn insert_redaction(&self, record: NewRedaction) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        if let Some(existing) = tables.redaction_by_validation.get(&record.validation_id) {
            return Ok(*existing);
        }
        let id = tables.next_id();
        tables
            .redaction_by_validation
            .insert(record.validation_id, id);
        tables
            .redactions
            .insert(id, RedactedSession::from_new(id, record, Utc::now()));
        Ok(id)
    }

    fn insert_insight(&self, insight: NewInsight) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let id = tables.next_id();
        tables
            .insights
            .insert(id, Insight::from_new(id, insight, Utc::now()));
        Ok(id)
    }

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let tables = self.read()?;
        let total = tables.raw_events.len() as u64;
        let consented = tables.raw_events.values().filter(|e| e.consent_given).count() as u64;
        let issues = tables
            .validations
            .values()
            .filter(|v| v.status != ValidationStatus::Valid)
            .count() as u64;
        let redacted = tables.redactions.len() as u64;
        Ok(Snapshot::from_counts(total, consented, redacted, issues))
    }

    fn latest_events(&self, limit: usize) -> Result<Vec<RawEvent>, StoreError> {
        Ok(newest(&self.read()?.raw_events, limit))
    }

    fn latest_validations(&self, limit: usize) -> Result<Vec<ValidationRecord>, StoreError> {
        Ok(newest(&self.read()?.validations, limit))
    }

    fn latest_redactions(&self, limit: usize) -> Result<Vec<RedactedSession>, StoreError> {
        Ok(newest(&self.read()?.redactions, limit))
    }

    fn latest_insights(&self, limit: usize) -> Result<Vec<Insight>, StoreError> {
        Ok(newest(&self.read()?.insights, limit))
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[test]
    fn test_unclaimed_in_creation_order() {
        contract::unclaimed_in_creation_order(&InMemoryStore::new());
    }

    #[test]
    fn test_claim_is_exactly_once() {
        contract::claim_is_exactly_once(&InMemoryStore::new());
    }

    #[test]
    fn test_claim_unknown_row_fails() {
        contract::claim_unknown_row_fails(&InMemoryStore::new());
    }

    #[test]
    fn test_derived_inserts_are_idempotent() {
        contract::derived_inserts_are_idempotent(&InMemoryStore::new());
    }

    #[test]
    fn test_pending_redaction_joins_source() {
        contract::pending_redaction_joins_source(&InMemoryStore::new());
    }

    #[test]
    fn test_snapshot_counts() {
        contract::snapshot_counts(&InMemoryStore::new());
    }

    #[test]
    fn test_latest_is_newest_first() {
        contract::latest_is_newest_first(&InMemoryStore::new());
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn EventStore> = Box::new(InMemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        store.insert_event(contract::event("s1", true)).unwrap();
        assert_eq!(store.latest_events(10).unwrap().len(), 1);
    }
}
