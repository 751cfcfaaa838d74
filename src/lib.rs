//! Consent Pipeline: staged clickstream processing over a shared store
//!
//! Events are ingested into a durable store and flow, without a central
//! orchestrator, through three independently supervised stages.
//!
//! ## Architecture
//!
//! - **Storage**: `EventStore` trait with sled and in-memory backends; the
//!   only hand-off point between stages
//! - **Agents**: Validator and Redactor (claim-based) and the timer-driven
//!   Insight stage
//! - **Aggregator**: on-demand snapshot statistics
//! - **Pipeline**: per-stage restart loops and the worker status board
//! - **LLM**: insight text generation with a deterministic template fallback
//! - **API**: thin Axum layer for ingestion and dashboards

pub mod agents;
pub mod aggregator;
pub mod api;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;

pub use types::{
    Claim, ComplianceStatus, Insight, NewEvent, PendingRedaction, RawEvent, RedactedSession,
    Snapshot, Stage, ValidationRecord, ValidationStatus,
};

pub use agents::{InsightAgent, Redactor, StageWorker, Validator};
pub use pipeline::{PipelineSupervisor, StatusBoard, WorkerSpec};
pub use storage::{EventStore, InMemoryStore, SledStore, StoreError};
