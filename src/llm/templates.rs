//! Deterministic insight and answer text derived from a snapshot.

use async_trait::async_trait;

use super::{GeneratorError, InsightGenerator};
use crate::types::Snapshot;

/// Insight text used when no LLM is configured.
pub fn insight_text(s: &Snapshot) -> String {
    if s.issues_detected > 0 {
        format!(
            "⚠️ Alert: {} data quality issues detected. The redactor is processing these sessions for compliance.",
            s.issues_detected
        )
    } else {
        format!(
            "✅ System healthy: {} events processed, {:.1}% with consent.",
            s.total_events, s.consent_percentage
        )
    }
}

/// Insight text substituted when an LLM call fails or times out.
pub fn insight_fallback(s: &Snapshot) -> String {
    format!(
        "⚠️ Monitoring {} events ({:.1}% consent rate)",
        s.total_events, s.consent_percentage
    )
}

/// Keyword-routed answer used when no LLM is configured.
pub fn answer_text(question: &str, s: &Snapshot) -> String {
    let q = question.to_lowercase();
    if q.contains("consent") {
        format!(
            "Based on current data: {:.1}% of users ({} out of {}) have provided consent.",
            s.consent_percentage, s.consented_events, s.total_events
        )
    } else if q.contains("issue") || q.contains("problem") {
        format!(
            "Currently tracking {} data quality issues that the validator has flagged.",
            s.issues_detected
        )
    } else {
        format!(
            "I'm monitoring {} events. {} sessions have been redacted for privacy compliance.",
            s.total_events, s.redacted_sessions
        )
    }
}

/// Answer substituted when an LLM call fails or times out.
pub fn answer_fallback(s: &Snapshot) -> String {
    format!(
        "Error processing question. Current stats: {} events, {:.1}% consent rate.",
        s.total_events, s.consent_percentage
    )
}

/// Generator backed purely by the templates above.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

#[async_trait]
impl InsightGenerator for TemplateGenerator {
    async fn generate_insight(&self, snapshot: &Snapshot) -> Result<String, GeneratorError> {
        Ok(insight_text(snapshot))
    }

    async fn answer_question(
        &self,
        question: &str,
        snapshot: &Snapshot,
    ) -> Result<String, GeneratorError> {
        Ok(answer_text(question, snapshot))
    }

    fn backend_name(&self) -> &'static str {
        "Template"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_insight() {
        let s = Snapshot::from_counts(3, 2, 3, 0);
        assert_eq!(insight_text(&s), "✅ System healthy: 3 events processed, 66.7% with consent.");
    }

    #[test]
    fn test_alert_insight() {
        let s = Snapshot::from_counts(3, 2, 3, 1);
        assert!(insight_text(&s).starts_with("⚠️ Alert: 1 data quality issues detected."));
    }

    #[test]
    fn test_whole_percentages_keep_one_decimal() {
        let s = Snapshot::from_counts(4, 4, 0, 0);
        assert_eq!(insight_fallback(&s), "⚠️ Monitoring 4 events (100.0% consent rate)");
    }

    #[test]
    fn test_answer_routing() {
        let s = Snapshot::from_counts(10, 7, 9, 4);
        assert_eq!(
            answer_text("What is the CONSENT rate?", &s),
            "Based on current data: 70.0% of users (7 out of 10) have provided consent."
        );
        assert_eq!(
            answer_text("any problems?", &s),
            "Currently tracking 4 data quality issues that the validator has flagged."
        );
        assert_eq!(
            answer_text("hello", &s),
            "I'm monitoring 10 events. 9 sessions have been redacted for privacy compliance."
        );
    }
}
