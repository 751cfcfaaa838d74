//! Pipeline stage identifiers and the per-row claim outcome

use serde::{Deserialize, Serialize};

/// One pipeline phase with its own input table and worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Consumes raw events, emits validation records
    Validator,
    /// Consumes validation records, emits redacted sessions
    Redactor,
    /// Watches the aggregate snapshot, emits insights
    Insight,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Validator, Stage::Redactor, Stage::Insight];

    /// Stable lowercase identifier used in logs, config keys and the status API.
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Validator => "validator",
            Stage::Redactor => "redactor",
            Stage::Insight => "insight",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Validator => write!(f, "Validator"),
            Stage::Redactor => write!(f, "Redactor"),
            Stage::Insight => write!(f, "Insight"),
        }
    }
}

/// Result of an atomic claim attempt on a single input row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The flag transitioned `false -> true` in this call
    Claimed,
    /// Another worker (or an earlier cycle) already holds the row
    AlreadyClaimed,
}
