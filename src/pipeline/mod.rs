//! Pipeline supervision
//!
//! ```text
//! RawEvent ──► Validator ──► ValidationRecord ──► Redactor ──► RedactedSession
//!                                                              │
//!                     Snapshot (aggregator) ──► Insight ──► Insight log
//! ```
//!
//! Stages never call each other; the store is the only hand-off point. The
//! supervisor gives every stage its own restart loop and publishes the last
//! status line of each through the [`StatusBoard`].

mod status;
mod supervisor;

pub use status::{StatusBoard, StatusHandle, WorkerState, WorkerStatus, INITIAL_STATUS};
pub use supervisor::{run_guarded, supervise, CycleOutcome, PipelineSupervisor, WorkerSpec};
