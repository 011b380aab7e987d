//! Integration tests for the HTTP API

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

use gasket::core::{
    create_router, Gasket, GasketParts, HashingEmbedder, MemoryLockoutStore, ScriptedSource,
    VarianceEngine,
};
use gasket::GasketConfig;

fn create_test_gasket() -> Arc<Gasket> {
    let gasket = Gasket::new(
        GasketConfig::default(),
        GasketParts {
            source: Arc::new(ScriptedSource::new(["All ", "systems ", "nominal ", "this ", "morning."])),
            measure: Arc::new(VarianceEngine::new(
                Arc::new(HashingEmbedder::new()),
                Duration::from_secs(1),
            )),
            oracle: None,
            store: Arc::new(MemoryLockoutStore::new()),
        },
    )
    .unwrap();
    Arc::new(gasket)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read(response).await
}

async fn post(app: axum::Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read(response).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, json) = get(create_router(create_test_gasket()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["state"], "OPEN");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_status_endpoint() {
    let (status, json) = get(create_router(create_test_gasket()), "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "OPEN");
    assert_eq!(json["health_index"], 1.0);
    assert!(json["lockout"].is_null());
}

#[tokio::test]
async fn test_evaluate_endpoint() {
    let (status, json) = post(
        create_router(create_test_gasket()),
        "/evaluate",
        r#"{"prompt": "Report status"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["request_id"].is_string());
    assert_eq!(json["text"], "All systems nominal this morning.");
    assert_eq!(json["final_status"], "COMPLETED");
    assert_eq!(json["summary"]["released"], 5);
}

#[tokio::test]
async fn test_token_granted_then_verified() {
    let gasket = create_test_gasket();

    let (status, json) = post(
        create_router(gasket.clone()),
        "/token",
        r#"{"intent": "EXECUTE_TRADE", "entropy": 0.01}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["granted"], true);
    assert_eq!(json["reason"], "R500_CLEARANCE_GRANTED");
    let token_hex = json["token_hex"].as_str().unwrap().to_string();

    let (status, json) = post(
        create_router(gasket),
        "/verify",
        &serde_json::json!({ "token_hex": token_hex }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);
    assert_eq!(json["intent"], "EXECUTE_TRADE");
}

#[tokio::test]
async fn test_verify_rejects_garbage() {
    let (status, json) = post(
        create_router(create_test_gasket()),
        "/verify",
        r#"{"token_hex": "deadbeef"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], false);
    assert_eq!(json["reason"], "R511_TOKEN_MALFORMED");
}

#[tokio::test]
async fn test_token_over_limit_forbidden() {
    let (status, json) = post(
        create_router(create_test_gasket()),
        "/token",
        r#"{"intent": "EXECUTE_TRADE", "entropy": 0.07}"#,
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["granted"], false);
    assert_eq!(json["reason"], "R503_ENTROPY_OVER_LIMIT");
    assert!(json["token_hex"].is_null());
}

#[tokio::test]
async fn test_severe_entropy_locks_then_reset_reopens() {
    let gasket = create_test_gasket();

    let (status, json) = post(
        create_router(gasket.clone()),
        "/token",
        r#"{"intent": "EXECUTE_TRADE", "entropy": 0.5}"#,
    )
    .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(json["reason"], "R504_ENTROPY_SEVERE");

    let (status, json) = post(
        create_router(gasket.clone()),
        "/token",
        r#"{"intent": "EXECUTE_TRADE", "entropy": 0.0}"#,
    )
    .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(json["reason"], "R501_SYSTEM_LOCKED");

    let (_, json) = get(create_router(gasket.clone()), "/status").await;
    assert_eq!(json["state"], "LOCKED");

    let (status, json) = post(create_router(gasket), "/reset", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "OPEN");
}

#[tokio::test]
async fn test_evaluate_while_locked() {
    let gasket = create_test_gasket();
    gasket.gate().trigger_lockout("TEST_LOCK");

    let (status, json) = post(
        create_router(gasket),
        "/evaluate",
        r#"{"prompt": "anything"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["text"], "[SYSTEM_LOCKED]");
    assert_eq!(json["final_status"], "SYSTEM_LOCKED");
}
