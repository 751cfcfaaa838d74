//! API handlers — ingestion, dashboard reads, Q&A and the status stream.
//!
//! Handlers only translate between HTTP and the store / generator; no
//! pipeline logic lives here.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::aggregator;
use crate::config::defaults;
use crate::llm::{self, InsightGenerator};
use crate::pipeline::StatusBoard;
use crate::storage::{EventStore, StoreError};
use crate::types::{Insight, NewEvent, Stage};

// ============================================================================
// Shared State
// ============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn EventStore>,
    pub status: Arc<StatusBoard>,
    pub generator: Arc<dyn InsightGenerator>,
    pub llm_timeout: Duration,
    pub stream_interval: Duration,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn EventStore>,
        status: Arc<StatusBoard>,
        generator: Arc<dyn InsightGenerator>,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            store,
            status,
            generator,
            llm_timeout,
            stream_interval: Duration::from_secs(defaults::SSE_INTERVAL_SECS),
        }
    }
}

fn store_failure(e: &StoreError) -> Response {
    warn!(error = %e, "Store error while serving request");
    ApiErrorResponse::internal(e.to_string())
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn resolve(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, defaults::MAX_RECENT_LIMIT)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventAccepted {
    pub event_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
    pub generator: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /api/v1/events`
pub async fn submit_event(
    State(state): State<ApiState>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(event) => event,
        Err(rejection) => return ApiErrorResponse::bad_request(rejection.body_text()),
    };

    let event = match event.sanitize() {
        Ok(event) => event,
        Err(e) => return ApiErrorResponse::bad_request(e.to_string()),
    };

    match state.store.insert_event(event) {
        Ok(event_id) => {
            info!(event_id, "📥 Event ingested");
            ApiResponse::created(EventAccepted { event_id })
        }
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/stats`
pub async fn stats(State(state): State<ApiState>) -> Response {
    match aggregator::snapshot(state.store.as_ref()) {
        Ok(snapshot) => ApiResponse::ok(snapshot),
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/events/recent`
pub async fn recent_events(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> Response {
    match state.store.latest_events(q.resolve(defaults::RECENT_ROWS_LIMIT)) {
        Ok(rows) => ApiResponse::ok(rows),
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/insights/recent`
pub async fn recent_insights(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> Response {
    match state.store.latest_insights(q.resolve(defaults::RECENT_INSIGHTS_LIMIT)) {
        Ok(rows) => ApiResponse::ok(rows),
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/validations/recent`
pub async fn recent_validations(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> Response {
    match state.store.latest_validations(q.resolve(defaults::RECENT_ROWS_LIMIT)) {
        Ok(rows) => ApiResponse::ok(rows),
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/redactions/recent`
pub async fn recent_redactions(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> Response {
    match state.store.latest_redactions(q.resolve(defaults::RECENT_ROWS_LIMIT)) {
        Ok(rows) => ApiResponse::ok(rows),
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/workers/status` — stage → last status line.
pub async fn worker_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.status.messages())
}

/// `GET /api/v1/workers` — full status including state and timestamp.
pub async fn worker_details(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.status.all())
}

/// `POST /api/v1/ask`
pub async fn ask(
    State(state): State<ApiState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return ApiErrorResponse::bad_request(rejection.body_text()),
    };

    let question = req.question.trim();
    if question.is_empty() {
        return ApiErrorResponse::bad_request("No question provided");
    }

    let snapshot = match aggregator::snapshot(state.store.as_ref()) {
        Ok(snapshot) => snapshot,
        Err(e) => return store_failure(&e),
    };

    let answer = llm::answer_with_fallback(
        state.generator.as_ref(),
        question,
        &snapshot,
        state.llm_timeout,
    )
    .await;

    ApiResponse::ok(AskResponse {
        question: question.to_string(),
        answer,
    })
}

/// `GET /health`
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        storage: state.store.backend_name(),
        generator: state.generator.backend_name(),
    })
}

// ============================================================================
// Server-Sent Events
// ============================================================================

struct StreamCursor {
    state: ApiState,
    ticker: tokio::time::Interval,
    last_insight: Option<u64>,
}

fn status_event(messages: &BTreeMap<Stage, String>) -> Option<Event> {
    Event::default()
        .event("agent_status")
        .json_data(messages)
        .ok()
}

fn insight_event(insight: &Insight) -> Option<Event> {
    Event::default().event("new_insight").json_data(insight).ok()
}

/// Events for one tick: the status frame, plus the newest insight when it
/// has not been sent on this connection yet.
fn frame(cursor: &mut StreamCursor) -> Vec<Event> {
    let mut events: Vec<Event> = status_event(&cursor.state.status.messages())
        .into_iter()
        .collect();

    match cursor.state.store.latest_insights(1) {
        Ok(latest) => {
            if let Some(insight) = latest.first() {
                if cursor.last_insight != Some(insight.id) {
                    cursor.last_insight = Some(insight.id);
                    events.extend(insight_event(insight));
                }
            }
        }
        Err(e) => warn!(error = %e, "Failed to read latest insight for stream"),
    }
    events
}

pub fn status_stream(state: ApiState) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut ticker = tokio::time::interval(state.stream_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let cursor = StreamCursor {
        state,
        ticker,
        last_insight: None,
    };

    stream::unfold(cursor, |mut cursor| async move {
        cursor.ticker.tick().await;
        let events = frame(&mut cursor);
        Some((events, cursor))
    })
    .flat_map(|events| stream::iter(events.into_iter().map(Ok)))
}

/// `GET /api/v1/stream`
pub async fn stream_status(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(status_stream(state)).keep_alive(KeepAlive::default())
}
