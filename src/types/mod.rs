//! Shared data structures for the staged clickstream pipeline
//!
//! Every record a stage reads or writes lives here:
//! - Ingestion: NewEvent -> RawEvent
//! - Validator stage: ValidationRecord (status + ordered issues)
//! - Redactor stage: PendingRedaction -> RedactedSession
//! - Insight stage: Snapshot -> Insight

mod records;
mod snapshot;
mod stage;

pub use records::*;
pub use snapshot::*;
pub use stage::*;
