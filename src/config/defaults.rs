//! System-wide default constants.
//!
//! Grouped by subsystem. Every value here can be overridden from
//! `pipeline.toml` unless noted otherwise.

// ============================================================================
// Storage
// ============================================================================

/// Default on-disk location of the sled database.
pub const DEFAULT_DB_PATH: &str = "./data/pipeline.db";

/// sled background flush interval (milliseconds).
pub const DB_FLUSH_EVERY_MS: u64 = 500;

// ============================================================================
// Stage Workers
// ============================================================================

/// Validator poll interval (seconds).
pub const VALIDATOR_POLL_SECS: u64 = 3;

/// Redactor poll interval (seconds).
pub const REDACTOR_POLL_SECS: u64 = 3;

/// Insight poll interval (seconds). Slower than the claim-based stages.
pub const INSIGHT_POLL_SECS: u64 = 10;

/// Sleep after a failed validator cycle (seconds).
pub const VALIDATOR_BACKOFF_SECS: u64 = 5;

/// Sleep after a failed redactor cycle (seconds).
pub const REDACTOR_BACKOFF_SECS: u64 = 5;

/// Sleep after a failed insight cycle (seconds).
pub const INSIGHT_BACKOFF_SECS: u64 = 10;

// ============================================================================
// Insight Generation
// ============================================================================

/// Growth in `total_events` that triggers a new insight.
pub const INSIGHT_EVENT_DELTA: u64 = 5;

/// Upper bound on a single LLM call before the template fallback is used (seconds).
pub const LLM_TIMEOUT_SECS: u64 = 15;

pub const LLM_MODEL: &str = "gpt-3.5-turbo";

pub const LLM_API_BASE: &str = "https://api.openai.com/v1";

/// Completion budget for insight text.
pub const LLM_INSIGHT_MAX_TOKENS: u32 = 150;

/// Completion budget for answers to dashboard questions.
pub const LLM_ANSWER_MAX_TOKENS: u32 = 200;

pub const LLM_TEMPERATURE: f32 = 0.7;

// ============================================================================
// HTTP API
// ============================================================================

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:5000";

/// Rows returned by the `recent` endpoints when no limit is given.
pub const RECENT_ROWS_LIMIT: usize = 10;

/// Insights returned by `/insights/recent` when no limit is given.
pub const RECENT_INSIGHTS_LIMIT: usize = 5;

/// Hard cap on any `limit` query parameter.
pub const MAX_RECENT_LIMIT: usize = 500;

/// Interval between server-sent status frames (seconds).
pub const SSE_INTERVAL_SECS: u64 = 2;

/// Request body limit for ingestion (bytes). Not configurable.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
