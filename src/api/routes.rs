//! API route table.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

/// Routes mounted under `/api/v1`.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        // Ingestion
        .route("/events", post(handlers::submit_event))
        // Dashboard reads
        .route("/stats", get(handlers::stats))
        .route("/events/recent", get(handlers::recent_events))
        .route("/validations/recent", get(handlers::recent_validations))
        .route("/redactions/recent", get(handlers::recent_redactions))
        .route("/insights/recent", get(handlers::recent_insights))
        // Workers
        .route("/workers", get(handlers::worker_details))
        .route("/workers/status", get(handlers::worker_status))
        .route("/stream", get(handlers::stream_status))
        // Q&A
        .route("/ask", post(handlers::ask))
        .with_state(state)
}

/// Routes outside the versioned prefix.
pub fn root_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .with_state(state)
}
