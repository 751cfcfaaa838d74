//! Insight text generation
//!
//! Insight text and dashboard answers come from an [`InsightGenerator`]:
//!
//! - **TemplateGenerator**: deterministic strings built from the snapshot, no I/O
//! - **OpenAiGenerator**: OpenAI-compatible chat completions over HTTP
//!
//! Generation is best-effort. [`generate_with_fallback`] and
//! [`answer_with_fallback`] bound every call with a timeout and substitute a
//! templated string on error, so callers never see a generator failure.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::types::Snapshot;

mod openai;
pub mod templates;

pub use openai::OpenAiGenerator;
pub use templates::TemplateGenerator;

/// Generator failures. Never surface past the fallback helpers.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM API returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("LLM API returned no completion text")]
    EmptyResponse,
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),
}

/// Backend producing human-readable text about the pipeline state.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    /// One or two sentences describing the current snapshot.
    async fn generate_insight(&self, snapshot: &Snapshot) -> Result<String, GeneratorError>;

    /// Answer a free-form question using the snapshot figures.
    async fn answer_question(
        &self,
        question: &str,
        snapshot: &Snapshot,
    ) -> Result<String, GeneratorError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Insight text within `limit`, or the template fallback.
pub async fn generate_with_fallback(
    generator: &dyn InsightGenerator,
    snapshot: &Snapshot,
    limit: Duration,
) -> String {
    let result = tokio::time::timeout(limit, generator.generate_insight(snapshot))
        .await
        .unwrap_or(Err(GeneratorError::Timeout(limit)));

    match result {
        Ok(text) => text,
        Err(e) => {
            warn!(backend = generator.backend_name(), error = %e, "[Insight] LLM error, using fallback text");
            templates::insight_fallback(snapshot)
        }
    }
}

/// Answer within `limit`, or the templated error answer.
pub async fn answer_with_fallback(
    generator: &dyn InsightGenerator,
    question: &str,
    snapshot: &Snapshot,
    limit: Duration,
) -> String {
    let result = tokio::time::timeout(limit, generator.answer_question(question, snapshot))
        .await
        .unwrap_or(Err(GeneratorError::Timeout(limit)));

    match result {
        Ok(text) => text,
        Err(e) => {
            warn!(backend = generator.backend_name(), error = %e, "LLM error while answering question");
            templates::answer_fallback(snapshot)
        }
    }
}
