//! Persisted row types: one struct per table plus the insert payloads.
//!
//! Rows are written once by their owning stage and never mutated afterwards,
//! except for the per-stage claim flag on `RawEvent` and `ValidationRecord`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for any free-text field accepted at ingestion.
pub const MAX_FIELD_LEN: usize = 2_048;

// ============================================================================
// Ingestion
// ============================================================================

/// Rejected ingestion payload. Never reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("field `{field}` exceeds {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("field `{field}` contains control characters")]
    ControlCharacters { field: &'static str },
}

/// Ingestion payload for a single clickstream event.
///
/// Required fields may arrive empty; that is recorded by the validator as a
/// "Missing <field>" issue rather than rejected here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub consent_given: bool,
    #[serde(default)]
    pub encrypt_email: bool,
}

impl NewEvent {
    /// Check payload shape and normalise empty optionals to `None`.
    pub fn sanitize(mut self) -> Result<Self, IngestError> {
        let fields: [(&'static str, Option<&str>); 5] = [
            ("session_id", Some(self.session_id.as_str())),
            ("event_type", Some(self.event_type.as_str())),
            ("page_url", Some(self.page_url.as_str())),
            ("user_email", self.user_email.as_deref()),
            ("ip_address", self.ip_address.as_deref()),
        ];

        for (field, value) in fields {
            let Some(value) = value else { continue };
            if value.len() > MAX_FIELD_LEN {
                return Err(IngestError::FieldTooLong { field, max: MAX_FIELD_LEN });
            }
            if value.chars().any(char::is_control) {
                return Err(IngestError::ControlCharacters { field });
            }
        }

        self.user_email = self.user_email.filter(|e| !e.is_empty());
        self.ip_address = self.ip_address.filter(|ip| !ip.is_empty());
        Ok(self)
    }
}

/// A stored clickstream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: u64,
    pub session_id: String,
    pub event_type: String,
    pub page_url: String,
    pub user_email: Option<String>,
    pub ip_address: Option<String>,
    pub consent_given: bool,
    pub encrypt_email: bool,
    pub created_at: DateTime<Utc>,
    /// Flipped `false -> true` exactly once by the validator stage
    pub claimed_by_validator: bool,
}

impl RawEvent {
    pub fn from_new(id: u64, event: NewEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            session_id: event.session_id,
            event_type: event.event_type,
            page_url: event.page_url,
            user_email: event.user_email,
            ip_address: event.ip_address,
            consent_given: event.consent_given,
            encrypt_email: event.encrypt_email,
            created_at,
            claimed_by_validator: false,
        }
    }
}

// ============================================================================
// Validator Stage
// ============================================================================

/// Outcome class of a validated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Valid,
    Error,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStatus::Valid => write!(f, "VALID"),
            ValidationStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Validator output before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewValidation {
    pub event_id: u64,
    pub session_id: String,
    pub status: ValidationStatus,
    pub issues: Vec<String>,
}

/// One validation result per raw event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: u64,
    pub event_id: u64,
    pub session_id: String,
    pub status: ValidationStatus,
    /// Issue strings in check order
    pub issues: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Flipped `false -> true` exactly once by the redactor stage
    pub claimed_by_redactor: bool,
}

impl ValidationRecord {
    pub fn from_new(id: u64, record: NewValidation, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            event_id: record.event_id,
            session_id: record.session_id,
            status: record.status,
            issues: record.issues,
            created_at,
            claimed_by_redactor: false,
        }
    }
}

// ============================================================================
// Redactor Stage
// ============================================================================

/// A validation record joined with the PII fields of its source event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRedaction {
    pub record: ValidationRecord,
    pub user_email: Option<String>,
    pub ip_address: Option<String>,
    pub consent_given: bool,
}

/// Privacy outcome of a redacted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplianceStatus::Compliant => write!(f, "COMPLIANT"),
            ComplianceStatus::NonCompliant => write!(f, "NON_COMPLIANT"),
        }
    }
}

/// Redactor output before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRedaction {
    /// Source validation record; at most one redacted session exists per id
    pub validation_id: u64,
    pub session_id: String,
    pub email_redacted: Option<String>,
    pub ip_redacted: Option<String>,
    pub event_count: u32,
    pub redaction_log: Vec<String>,
    pub compliance_status: ComplianceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedSession {
    pub id: u64,
    pub validation_id: u64,
    pub session_id: String,
    pub email_redacted: Option<String>,
    pub ip_redacted: Option<String>,
    pub event_count: u32,
    pub redaction_log: Vec<String>,
    pub compliance_status: ComplianceStatus,
    pub created_at: DateTime<Utc>,
}

impl RedactedSession {
    pub fn from_new(id: u64, record: NewRedaction, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            validation_id: record.validation_id,
            session_id: record.session_id,
            email_redacted: record.email_redacted,
            ip_redacted: record.ip_redacted,
            event_count: record.event_count,
            redaction_log: record.redaction_log,
            compliance_status: record.compliance_status,
            created_at,
        }
    }
}

// ============================================================================
// Insight Stage
// ============================================================================

/// Insight type written by the timer-driven insight stage.
pub const INSIGHT_TYPE_REAL_TIME: &str = "REAL_TIME";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInsight {
    pub insight_type: String,
    pub text: String,
    pub related_sessions: Option<Vec<String>>,
}

/// Append-only insight log entry. Not tied to any single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub id: u64,
    pub insight_type: String,
    pub text: String,
    pub related_sessions: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn from_new(id: u64, insight: NewInsight, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            insight_type: insight.insight_type,
            text: insight.text,
            related_sessions: insight.related_sessions,
            created_at,
        }
    }
}
