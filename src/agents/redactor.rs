//! Redactor stage — masks PII on validated sessions
//!
//! Consent decides everything: without it both fields collapse to a fixed
//! sentinel and the session is NON_COMPLIANT. With it, plaintext emails are
//! replaced by their SHA-256 digest and IPv4 addresses lose their last two
//! octets. Both transforms are idempotent, so re-redacting a redacted value
//! yields the same value.

use sha2::{Digest, Sha256};
use tracing::info;

use super::validator::is_ipv4_shape;
use super::worker::ClaimingStage;
use crate::storage::{EventStore, StoreError};
use crate::types::{ComplianceStatus, NewRedaction, PendingRedaction, Stage};

/// Replacement for every PII field of a non-consented session.
pub const NO_CONSENT_SENTINEL: &str = "[REDACTED - NO CONSENT]";

const NO_CONSENT_LOG: &str = "Full redaction: User did not provide consent";

/// Length of the digest prefix written to the redaction log.
const LOG_DIGEST_PREFIX: usize = 16;

/// True for a 64-character lowercase hex string, the shape `hash_email` produces.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Lowercase hex SHA-256 of the UTF-8 bytes of `email`.
pub fn hash_email(email: &str) -> String {
    hex::encode(Sha256::digest(email.as_bytes()))
}

/// `a.b.c.d` → `a.b.*.*`. Anything that is not four numeric octets is
/// returned unchanged, which makes the function idempotent.
pub fn generalize_ip(ip: &str) -> String {
    if !is_ipv4_shape(ip) {
        return ip.to_string();
    }
    let mut octets = ip.split('.');
    match (octets.next(), octets.next()) {
        (Some(a), Some(b)) => format!("{a}.{b}.*.*"),
        _ => ip.to_string(),
    }
}

fn prefix(value: &str) -> &str {
    value.get(..LOG_DIGEST_PREFIX).unwrap_or(value)
}

/// Result of redacting one pending session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redaction {
    pub email: Option<String>,
    pub ip: Option<String>,
    pub log: Vec<String>,
    pub compliance: ComplianceStatus,
    /// Fields actually transformed (hashed email, generalized IP)
    pub pii_fields_masked: u32,
}

/// Apply the redaction rules to a pending session. Pure.
pub fn apply_redaction(pending: &PendingRedaction) -> Redaction {
    if !pending.consent_given {
        return Redaction {
            email: Some(NO_CONSENT_SENTINEL.to_string()),
            ip: Some(NO_CONSENT_SENTINEL.to_string()),
            log: vec![NO_CONSENT_LOG.to_string()],
            compliance: ComplianceStatus::NonCompliant,
            pii_fields_masked: 0,
        };
    }

    let mut log = Vec::new();
    let mut masked = 0;

    let email = pending.user_email.as_deref().map(|email| {
        if is_sha256_hex(email) {
            log.push(format!("Email already encrypted (SHA256): {}...", prefix(email)));
            email.to_string()
        } else {
            let digest = hash_email(email);
            log.push(format!(
                "Email encrypted with SHA256: {email} → {}...",
                prefix(&digest)
            ));
            masked += 1;
            digest
        }
    });

    let ip = pending.ip_address.as_deref().map(|ip| {
        let generalized = generalize_ip(ip);
        log.push(format!("IP generalized: {ip} → {generalized}"));
        masked += 1;
        generalized
    });

    Redaction {
        email,
        ip,
        log,
        compliance: ComplianceStatus::Compliant,
        pii_fields_masked: masked,
    }
}

/// Redactor stage state.
#[derive(Debug, Default)]
pub struct Redactor {
    sessions_redacted: u64,
    pii_fields_masked: u64,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions_redacted(&self) -> u64 {
        self.sessions_redacted
    }

    pub fn pii_fields_masked(&self) -> u64 {
        self.pii_fields_masked
    }
}

impl ClaimingStage for Redactor {
    type Input = PendingRedaction;
    type Output = Redaction;

    const STAGE: Stage = Stage::Redactor;

    fn poll(&self, store: &dyn EventStore) -> Result<Vec<PendingRedaction>, StoreError> {
        store.fetch_unclaimed_validations()
    }

    fn row_id(input: &PendingRedaction) -> u64 {
        input.record.id
    }

    fn transform(&self, input: &PendingRedaction) -> Redaction {
        apply_redaction(input)
    }

    fn emit(
        &self,
        store: &dyn EventStore,
        input: &PendingRedaction,
        output: &Redaction,
    ) -> Result<u64, StoreError> {
        store.insert_redaction(NewRedaction {
            validation_id: input.record.id,
            session_id: input.record.session_id.clone(),
            email_redacted: output.email.clone(),
            ip_redacted: output.ip.clone(),
            event_count: 1,
            redaction_log: output.log.clone(),
            compliance_status: output.compliance,
        })
    }

    fn observe(&mut self, input: &PendingRedaction, output: &Redaction) {
        self.sessions_redacted += 1;
        self.pii_fields_masked += u64::from(output.pii_fields_masked);
        info!(
            "[Redactor] 🔒 Session {} - {} ({} log entries)",
            input.record.session_id,
            output.compliance,
            output.log.len()
        );
    }

    fn busy_status(&self, batch: usize) -> String {
        format!("Redacting {batch} sessions")
    }

    fn idle_status(&self) -> String {
        "Monitoring for sessions to redact...".to_string()
    }

    fn summary_status(&self) -> String {
        format!(
            "Redacted {} sessions | {} PII fields masked",
            self.sessions_redacted, self.pii_fields_masked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ValidationRecord, ValidationStatus};
    use chrono::Utc;

    fn pending(email: Option<&str>, ip: Option<&str>, consent: bool) -> PendingRedaction {
        PendingRedaction {
            record: ValidationRecord {
                id: 7,
                event_id: 1,
                session_id: "s1".to_string(),
                status: ValidationStatus::Valid,
                issues: Vec::new(),
                created_at: Utc::now(),
                claimed_by_redactor: false,
            },
            user_email: email.map(str::to_string),
            ip_address: ip.map(str::to_string),
            consent_given: consent,
        }
    }

    #[test]
    fn test_hash_email_known_digest() {
        assert_eq!(
            hash_email("a@b.com"),
            "fb98d44ad7501a959f3f4f4a3f004fe2d9e581ea6207e218c4b02c08a4d75adf"
        );
        assert!(is_sha256_hex(&hash_email("anything")));
    }

    #[test]
    fn test_digest_detection_is_lowercase_only() {
        let digest = hash_email("x@y.org");
        assert!(is_sha256_hex(&digest));
        assert!(!is_sha256_hex(&digest.to_uppercase()));
        assert!(!is_sha256_hex(&digest[..63]));
        assert!(!is_sha256_hex("a@b.com"));
    }

    #[test]
    fn test_generalize_ip() {
        assert_eq!(generalize_ip("192.168.1.1"), "192.168.*.*");
        assert_eq!(generalize_ip("127.0.0.1"), "127.0.*.*");
        assert_eq!(generalize_ip("192.168.*.*"), "192.168.*.*");
        assert_eq!(generalize_ip("not-an-ip"), "not-an-ip");
        assert_eq!(generalize_ip("10.0.0"), "10.0.0");
    }

    #[test]
    fn test_no_consent_full_redaction() {
        let r = apply_redaction(&pending(Some("a@b.com"), Some("10.1.2.3"), false));
        assert_eq!(r.email.as_deref(), Some(NO_CONSENT_SENTINEL));
        assert_eq!(r.ip.as_deref(), Some(NO_CONSENT_SENTINEL));
        assert_eq!(r.log, vec![NO_CONSENT_LOG]);
        assert_eq!(r.compliance, ComplianceStatus::NonCompliant);
    }

    #[test]
    fn test_no_consent_sentinel_even_without_pii() {
        let r = apply_redaction(&pending(None, None, false));
        assert_eq!(r.email.as_deref(), Some(NO_CONSENT_SENTINEL));
        assert_eq!(r.ip.as_deref(), Some(NO_CONSENT_SENTINEL));
    }

    #[test]
    fn test_consented_hash_and_generalize() {
        let r = apply_redaction(&pending(Some("a@b.com"), Some("192.168.1.1"), true));
        let digest = hash_email("a@b.com");
        assert_eq!(r.email.as_deref(), Some(digest.as_str()));
        assert_eq!(r.ip.as_deref(), Some("192.168.*.*"));
        assert_eq!(r.compliance, ComplianceStatus::Compliant);
        assert_eq!(r.pii_fields_masked, 2);
        assert_eq!(
            r.log,
            vec![
                format!("Email encrypted with SHA256: a@b.com → {}...", &digest[..16]),
                "IP generalized: 192.168.1.1 → 192.168.*.*".to_string(),
            ]
        );
    }

    #[test]
    fn test_existing_digest_passes_through() {
        let digest = hash_email("a@b.com");
        let r = apply_redaction(&pending(Some(&digest), None, true));
        assert_eq!(r.email.as_deref(), Some(digest.as_str()));
        assert_eq!(r.ip, None);
        assert_eq!(r.pii_fields_masked, 0);
        assert_eq!(
            r.log,
            vec![format!("Email already encrypted (SHA256): {}...", &digest[..16])]
        );
    }

    #[test]
    fn test_consented_without_pii() {
        let r = apply_redaction(&pending(None, None, true));
        assert_eq!(r.email, None);
        assert_eq!(r.ip, None);
        assert!(r.log.is_empty());
        assert_eq!(r.compliance, ComplianceStatus::Compliant);
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let first = apply_redaction(&pending(Some("a@b.com"), Some("8.8.8.8"), true));
        let second = apply_redaction(&pending(first.email.as_deref(), first.ip.as_deref(), true));
        assert_eq!(first.email, second.email);
        assert_eq!(first.ip, second.ip);
    }

    #[test]
    fn test_deterministic() {
        let p = pending(Some("z@z.io"), Some("1.2.3.4"), true);
        assert_eq!(apply_redaction(&p), apply_redaction(&p));
    }

    #[test]
    fn test_status_lines() {
        let mut redactor = Redactor::new();
        let p = pending(Some("a@b.com"), Some("1.2.3.4"), true);
        let out = redactor.transform(&p);
        redactor.observe(&p, &out);
        assert_eq!(redactor.busy_status(3), "Redacting 3 sessions");
        assert_eq!(redactor.summary_status(), "Redacted 1 sessions | 2 PII fields masked");
    }
}
