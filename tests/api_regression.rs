//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! the /api/v1/* endpoints using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port.

use consent_pipeline::agents::{redactor_worker, validator_worker, StageWorker};
use consent_pipeline::api::{create_app, ApiState};
use consent_pipeline::llm::TemplateGenerator;
use consent_pipeline::pipeline::StatusBoard;
use consent_pipeline::storage::{EventStore, InMemoryStore};
use consent_pipeline::types::Stage;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn create_test_state() -> (ApiState, Arc<dyn EventStore>) {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryStore::new());
    let state = ApiState::new(
        Arc::clone(&store),
        Arc::new(StatusBoard::new()),
        Arc::new(TemplateGenerator),
        Duration::from_secs(1),
    );
    (state, store)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// All v1 GET endpoints except the stream should return 200.
#[tokio::test]
async fn test_v1_get_endpoints_return_200() {
    let endpoints = [
        "/health",
        "/api/v1/stats",
        "/api/v1/events/recent",
        "/api/v1/validations/recent",
        "/api/v1/redactions/recent",
        "/api/v1/insights/recent",
        "/api/v1/workers",
        "/api/v1/workers/status",
    ];

    for endpoint in &endpoints {
        let (state, _) = create_test_state();
        let resp = create_app(state).oneshot(get(endpoint)).await.unwrap();

        assert!(
            resp.status().is_success(),
            "GET {endpoint} returned status {}",
            resp.status()
        );
    }
}

#[tokio::test]
async fn test_health_reports_backends() {
    let (state, _) = create_test_state();
    let resp = create_app(state).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["generator"], "Template");
}

#[tokio::test]
async fn test_ingest_then_process_then_read() {
    let (state, store) = create_test_state();
    let app = create_app(state.clone());

    let resp = app
        .clone()
        .oneshot(post_json(
            "/api/v1/events",
            &serde_json::json!({
                "session_id": "s1",
                "event_type": "click",
                "page_url": "/x",
                "user_email": "a@b.com",
                "consent_given": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["event_id"], 1);
    assert_eq!(json["meta"]["version"], "1");

    validator_worker(Arc::clone(&store))
        .run_cycle(&state.status.handle(Stage::Validator))
        .await
        .unwrap();
    redactor_worker(Arc::clone(&store))
        .run_cycle(&state.status.handle(Stage::Redactor))
        .await
        .unwrap();

    let json = body_json(app.clone().oneshot(get("/api/v1/stats")).await.unwrap()).await;
    assert_eq!(json["data"]["total_events"], 1);
    assert_eq!(json["data"]["redacted_sessions"], 1);
    assert_eq!(json["data"]["issues_detected"], 1);
    assert_eq!(json["data"]["consent_percentage"], 100.0);

    let json = body_json(
        app.clone()
            .oneshot(get("/api/v1/redactions/recent?limit=1"))
            .await
            .unwrap(),
    )
    .await;
    let rows = json["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["compliance_status"], "COMPLIANT");
    assert_eq!(rows[0]["email_redacted"].as_str().unwrap().len(), 64);

    let json = body_json(app.oneshot(get("/api/v1/workers/status")).await.unwrap()).await;
    assert_eq!(json["data"]["validator"], "Validated 1 events | Found 1 issues");
    assert_eq!(json["data"]["redactor"], "Redacted 1 sessions | 1 PII fields masked");
    assert_eq!(json["data"]["insight"], "Starting...");
}

#[tokio::test]
async fn test_malformed_event_is_rejected() {
    let (state, store) = create_test_state();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let resp = create_app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
    assert!(store.latest_events(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_ask_without_question_is_bad_request() {
    let (state, _) = create_test_state();
    let resp = create_app(state)
        .oneshot(post_json("/api/v1/ask", &serde_json::json!({ "question": "  " })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["message"], "No question provided");
}

#[tokio::test]
async fn test_ask_routes_consent_questions() {
    let (state, store) = create_test_state();
    for consent in [true, true, false] {
        store
            .insert_event(consent_pipeline::types::NewEvent {
                session_id: "s".to_string(),
                event_type: "view".to_string(),
                page_url: "/".to_string(),
                consent_given: consent,
                ..Default::default()
            })
            .unwrap();
    }

    let resp = create_app(state)
        .oneshot(post_json(
            "/api/v1/ask",
            &serde_json::json!({ "question": "What is the consent rate?" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(
        json["data"]["answer"],
        "Based on current data: 66.7% of users (2 out of 3) have provided consent."
    );
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (state, _) = create_test_state();
    let resp = create_app(state)
        .oneshot(get("/api/v1/does-not-exist"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
