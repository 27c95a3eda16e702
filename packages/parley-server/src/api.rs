//! HTTP route handlers.
//!
//! ```text
//! POST /register   { username, password }        public
//! POST /login      { username, password }        public  → token
//! POST /send       { recipient, content }        bearer
//! GET  /messages   ?recipient=..&timestamp=..    bearer
//! GET  /health                                   public
//! ```

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::Method,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use parley_core::Cursor;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::protocol::{
    Credentials, HistoryQuery, HistoryResponse, LoginResponse, SendRequest, StatusMessage,
};
use crate::state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/send", post(send_message))
        .route("/messages", get(get_messages))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Accounts ──────────────────────────────────────────────────────────────────

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    state
        .messaging
        .register(&req.username, &req.password)
        .await
        .map_err(|e| ApiError::messaging("Failed to register user", e))?;

    Ok(Json(StatusMessage::new("User registered successfully")))
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let valid = state
        .messaging
        .login(&req.username, &req.password)
        .await
        .map_err(|e| ApiError::messaging("Failed to validate login", e))?;
    if !valid {
        return Err(ApiError::Unauthorized(
            "Invalid username or password".to_string(),
        ));
    }

    let token = state.tokens.issue_token(&req.username)?;
    tracing::info!(username = req.username.as_str(), "Login successful");

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        token,
    }))
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// POST /send
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    state
        .messaging
        .send_message(&sender, &req.recipient, &req.content)
        .await
        .map_err(|e| ApiError::messaging("Failed to send message", e))?;

    Ok(Json(StatusMessage::new("Message sent successfully")))
}

/// GET /messages
///
/// Newest first, one page at a time. Pass the `timestamp` of the oldest
/// message received to get the next older page.
pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let cursor = Cursor::parse(query.timestamp.as_deref())?;

    let page = state
        .history
        .get_history(&requester, &query.recipient, cursor)
        .await
        .map_err(|e| ApiError::history("Failed to retrieve messages", e))?;

    tracing::debug!(
        requester = requester.as_str(),
        count = page.messages.len(),
        source = ?page.source,
        "History page served"
    );

    Ok(Json(HistoryResponse {
        messages: page.messages,
    }))
}

// ── Health ────────────────────────────────────────────────────────────────────

/// Health check endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "parley-server",
        "version": env!("CARGO_PKG_VERSION"),
        "cache_policy": state.messaging.policy().as_str(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
