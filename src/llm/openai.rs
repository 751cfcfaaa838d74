//! OpenAI-compatible chat completions backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GeneratorError, InsightGenerator};
use crate::config::InsightConfig;
use crate::types::Snapshot;

const INSIGHT_PROMPT: &str = r"You are an analytics assistant monitoring a clickstream data pipeline that processes data collected from web analytics (which may or may not have explicit user consent).

Current Statistics:
- Total events processed: {total}
- Events with user consent: {consented} ({pct}%)
- Sessions redacted for privacy: {redacted}
- Data quality issues detected: {issues}

Context: events without consent are automatically redacted to keep the pipeline compliant.

Generate a brief, factual insight (1-2 sentences) about the current state. Focus on:
- How the privacy system is working (redaction happening correctly)
- Data quality observations
- System health

Do NOT recommend implementing consent collection. Use emojis for visual clarity.";

const ANSWER_PROMPT: &str = r"You are an analytics assistant monitoring a privacy-preserving clickstream data pipeline.

Current Statistics:
- Total events: {total}
- Events with consent: {consented} ({pct}%)
- Redacted sessions: {redacted}
- Issues detected: {issues}

Context: PII is automatically redacted from events without consent.

Question: {question}

Provide a clear, factual answer with specific numbers from the data.";

fn fill(template: &str, s: &Snapshot) -> String {
    template
        .replace("{total}", &s.total_events.to_string())
        .replace("{consented}", &s.consented_events.to_string())
        .replace("{pct}", &format!("{:.1}", s.consent_percentage))
        .replace("{redacted}", &s.redacted_sessions.to_string())
        .replace("{issues}", &s.issues_detected.to_string())
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client.
#[derive(Clone)]
pub struct OpenAiGenerator {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    answer_max_tokens: u32,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, config: &InsightConfig) -> Result<Self, GeneratorError> {
        let http = reqwest::Client::builder()
            .timeout(config.llm_timeout())
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            answer_max_tokens: config.answer_max_tokens,
            temperature: config.temperature,
        })
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, GeneratorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: self.temperature,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GeneratorError::Status(resp.status()));
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(GeneratorError::EmptyResponse)?;

        debug!(model = %self.model, chars = text.len(), "Chat completion received");
        Ok(text)
    }
}

#[async_trait]
impl InsightGenerator for OpenAiGenerator {
    async fn generate_insight(&self, snapshot: &Snapshot) -> Result<String, GeneratorError> {
        self.complete(&fill(INSIGHT_PROMPT, snapshot), self.max_tokens)
            .await
    }

    async fn answer_question(
        &self,
        question: &str,
        snapshot: &Snapshot,
    ) -> Result<String, GeneratorError> {
        let prompt = fill(ANSWER_PROMPT, snapshot).replace("{question}", question);
        self.complete(&prompt, self.answer_max_tokens).await
    }

    fn backend_name(&self) -> &'static str {
        "OpenAI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_fill() {
        let s = Snapshot::from_counts(10, 7, 9, 4);
        let prompt = fill(INSIGHT_PROMPT, &s);
        assert!(prompt.contains("Total events processed: 10"));
        assert!(prompt.contains("Events with user consent: 7 (70.0%)"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"  ✅ All good.  "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("  ✅ All good.  "));

        let empty: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.choices.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_an_error() {
        let config = InsightConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            llm_timeout_secs: 1,
            ..InsightConfig::default()
        };
        let generator = OpenAiGenerator::new("test-key", &config).unwrap();
        let result = generator.generate_insight(&Snapshot::default()).await;
        assert!(result.is_err());
    }
}
