//! Validator stage — data-quality and compliance checks on raw events
//!
//! Checks run in a fixed order and the resulting issue list keeps that order:
//!
//! 1. Required fields (`session_id`, `event_type`, `page_url`)
//! 2. Consent
//! 3. Email encryption (64-char lowercase hex SHA-256 digest)
//! 4. Email shape (`local@domain.tld`)
//! 5. IPv4 shape, then loopback / zero-network warning
//!
//! Missing fields, compliance and security violations make the record
//! ERROR. Format findings are recorded but leave it VALID.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use super::redactor::is_sha256_hex;
use super::worker::ClaimingStage;
use crate::storage::{EventStore, StoreError};
use crate::types::{NewValidation, RawEvent, Stage, ValidationStatus};

/// Issue text for events captured without consent.
pub const CONSENT_VIOLATION: &str =
    "COMPLIANCE VIOLATION: Event captured without user consent - only consented events are allowed";

/// Issue text for plaintext emails.
pub const UNENCRYPTED_EMAIL_VIOLATION: &str =
    "SECURITY VIOLATION: Unencrypted email detected - clickstream must only capture encrypted emails";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email pattern is a valid constant regex")
    })
}

/// Four dot-separated groups of one to three ASCII digits.
pub fn is_ipv4_shape(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| (1..=3).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit()))
}

// ============================================================================
// Issues
// ============================================================================

/// Class of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    MissingField,
    Compliance,
    Security,
    Format,
    Warning,
}

impl IssueKind {
    /// Hard issues force the record to ERROR.
    pub const fn is_hard(self) -> bool {
        matches!(self, IssueKind::MissingField | IssueKind::Compliance | IssueKind::Security)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
}

impl Issue {
    fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of validating one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub status: ValidationStatus,
    pub issues: Vec<Issue>,
    /// The in-flight view of `encrypt_email`: true when the flag was set or
    /// the email already is a digest. Not written back to the raw event.
    pub email_encrypted: bool,
}

impl Validation {
    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }
}

/// Validate a single event. Pure: same input, same output.
pub fn validate_event(event: &RawEvent) -> Validation {
    let mut issues = Vec::new();
    let mut email_encrypted = event.encrypt_email;

    for (field, value) in [
        ("session_id", &event.session_id),
        ("event_type", &event.event_type),
        ("page_url", &event.page_url),
    ] {
        if value.is_empty() {
            issues.push(Issue::new(IssueKind::MissingField, format!("Missing {field}")));
        }
    }

    if !event.consent_given {
        issues.push(Issue::new(IssueKind::Compliance, CONSENT_VIOLATION));
    }

    if let Some(email) = event.user_email.as_deref() {
        if is_sha256_hex(email) {
            email_encrypted = true;
        } else if !event.encrypt_email {
            issues.push(Issue::new(IssueKind::Security, UNENCRYPTED_EMAIL_VIOLATION));
        }

        if !email_regex().is_match(email) {
            issues.push(Issue::new(
                IssueKind::Format,
                format!("Invalid email format: {email}"),
            ));
        }
    }

    if let Some(ip) = event.ip_address.as_deref() {
        if !is_ipv4_shape(ip) {
            issues.push(Issue::new(IssueKind::Format, format!("Invalid IP format: {ip}")));
        } else if ip.starts_with("127.") || ip.starts_with("0.") {
            issues.push(Issue::new(
                IssueKind::Warning,
                format!("Localhost/invalid IP detected: {ip}"),
            ));
        }
    }

    let status = if issues.iter().any(|i| i.kind.is_hard()) {
        ValidationStatus::Error
    } else {
        ValidationStatus::Valid
    };

    Validation {
        status,
        issues,
        email_encrypted,
    }
}

// ============================================================================
// Stage
// ============================================================================

/// Validator stage state: running counters for the status line.
#[derive(Debug, Default)]
pub struct Validator {
    events_processed: u64,
    events_with_issues: u64,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn events_with_issues(&self) -> u64 {
        self.events_with_issues
    }
}

impl ClaimingStage for Validator {
    type Input = RawEvent;
    type Output = Validation;

    const STAGE: Stage = Stage::Validator;

    fn poll(&self, store: &dyn EventStore) -> Result<Vec<RawEvent>, StoreError> {
        store.fetch_unclaimed_events()
    }

    fn row_id(input: &RawEvent) -> u64 {
        input.id
    }

    fn transform(&self, input: &RawEvent) -> Validation {
        validate_event(input)
    }

    fn emit(
        &self,
        store: &dyn EventStore,
        input: &RawEvent,
        output: &Validation,
    ) -> Result<u64, StoreError> {
        store.insert_validation(NewValidation {
            event_id: input.id,
            session_id: input.session_id.clone(),
            status: output.status,
            issues: output.issue_messages(),
        })
    }

    fn observe(&mut self, input: &RawEvent, output: &Validation) {
        self.events_processed += 1;
        if output.issues.is_empty() {
            info!("[Validator] ✅ Event {} - VALID", input.id);
        } else {
            self.events_with_issues += 1;
            warn!(
                "[Validator] ⚠️  Event {} - {}: {}",
                input.id,
                output.status,
                output.issue_messages().join(", ")
            );
        }
    }

    fn busy_status(&self, batch: usize) -> String {
        format!("Processing {batch} events")
    }

    fn idle_status(&self) -> String {
        "Monitoring for new events...".to_string()
    }

    fn summary_status(&self) -> String {
        format!(
            "Validated {} events | Found {} issues",
            self.events_processed, self.events_with_issues
        )
    }
}
