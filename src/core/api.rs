//! HTTP + WebSocket API for the gasket
//!
//! Endpoints:
//! - GET /health - Liveness + version
//! - GET /status - Gate state, health index, lockout record
//! - POST /evaluate - Generate and interdict one prompt
//! - POST /token - Request a clearance token
//! - POST /verify - Verify a clearance token
//! - POST /reset - Operator reset
//! - WS /ws/evaluate - First text message is the prompt; events streamed back

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::Gasket;
use crate::types::{ClearanceReason, Evaluation, GateState, GateStatus};

/// App state
pub struct AppState {
    pub gasket: Arc<Gasket>,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub state: GateState,
}

/// Evaluate request
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
}

/// Evaluate response
#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub request_id: Uuid,
    pub text: String,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

/// Token request
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub intent: String,
    pub entropy: f64,
}

/// Token response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub granted: bool,
    pub reason: String,
    pub description: String,
    pub token_hex: Option<String>,
}

/// Verify request
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token_hex: String,
}

/// Verify response
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub reason: String,
    pub intent: Option<String>,
}

/// Create the API router
pub fn create_router(gasket: Arc<Gasket>) -> Router {
    let state = Arc::new(AppState { gasket });

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/evaluate", post(evaluate))
        .route("/token", post(issue_token))
        .route("/verify", post(verify_token))
        .route("/reset", post(reset))
        .route("/ws/evaluate", get(websocket_handler))
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        state: state.gasket.status().state,
    })
}

/// Gate status
async fn status(State(state): State<Arc<AppState>>) -> Json<GateStatus> {
    Json(state.gasket.status())
}

/// Generate and interdict one prompt
async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvaluateRequest>,
) -> Json<EvaluateResponse> {
    let request_id = Uuid::new_v4();
    let gasket = &state.gasket;
    let system = req
        .system_prompt
        .unwrap_or_else(|| gasket.config().system_prompt.clone());

    tracing::info!(%request_id, "evaluate");
    let evaluation = gasket.evaluate_with_system(&req.prompt, &system).await;

    Json(EvaluateResponse {
        request_id,
        text: evaluation.rendered_text(),
        evaluation,
    })
}

/// Request a clearance token
async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> (StatusCode, Json<TokenResponse>) {
    let result = state.gasket.issue_token(&req.intent, req.entropy);

    let code = match result.reason {
        ClearanceReason::R500_CLEARANCE_GRANTED => StatusCode::OK,
        ClearanceReason::R501_SYSTEM_LOCKED | ClearanceReason::R504_ENTROPY_SEVERE => {
            StatusCode::LOCKED
        }
        _ => StatusCode::FORBIDDEN,
    };

    (
        code,
        Json(TokenResponse {
            granted: result.is_granted(),
            reason: result.reason.code().to_string(),
            description: result.reason.description().to_string(),
            token_hex: result.token.map(|t| t.to_hex()),
        }),
    )
}

/// Verify a clearance token
async fn verify_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    let response = match state.gasket.verify_token(&req.token_hex) {
        Ok(token) => VerifyResponse {
            valid: true,
            reason: "TOKEN_VALID".to_string(),
            intent: Some(token.payload.intent),
        },
        Err(rejection) => VerifyResponse {
            valid: false,
            reason: rejection.code().to_string(),
            intent: None,
        },
    };
    Json(response)
}

/// Operator reset
async fn reset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GateStatus>, (StatusCode, String)> {
    state
        .gasket
        .reset()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(state.gasket.status()))
}

/// WebSocket handler for streamed evaluation
async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        handle_websocket(socket, state.gasket.clone()).await;
    })
}

/// Handle WebSocket connection
async fn handle_websocket(mut socket: WebSocket, gasket: Arc<Gasket>) {
    let prompt = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => continue,
        }
    };

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, "websocket evaluate");

    // Dropping `events` on disconnect cancels the producer.
    let mut events = gasket.stream(&prompt).await;
    while let Some(event) = events.next().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "event serialization failed");
                break;
            }
        };
        if socket.send(Message::Text(json)).await.is_err() {
            tracing::debug!(%request_id, "websocket client went away");
            break;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Run the API server
pub async fn run_server(addr: &str, gasket: Arc<Gasket>) -> Result<(), Box<dyn std::error::Error>> {
    let router = create_router(gasket);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "gasket API listening");
    println!("⛨ Gasket API running on {}", addr);
    println!("  GET  /health       - Health check");
    println!("  GET  /status       - Gate status");
    println!("  POST /evaluate     - Evaluate a prompt");
    println!("  POST /token        - Request clearance");
    println!("  POST /verify       - Verify clearance token");
    println!("  POST /reset        - Operator reset");
    println!("  WS   /ws/evaluate  - Streamed evaluation");
    axum::serve(listener, router).await?;
    Ok(())
}
