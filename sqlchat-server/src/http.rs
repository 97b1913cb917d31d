//! sqlchat HTTP API
//!
//! Axum server exposing the streaming chat endpoint, conversation management
//! and the bundled browser client.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)` (or the event receiver, for
//! streams), so the logic is testable without axum dispatch.
//!
//! Endpoints:
//! - GET    /                   — browser client
//! - GET    /health             — store status
//! - GET    /version            — server version info
//! - GET    /chat/stream        — SSE answer stream (query parameters)
//! - POST   /chat/stream        — SSE answer stream (JSON body)
//! - POST   /conversations      — allocate a fresh conversation id
//! - GET    /conversations/:id  — conversation history
//! - DELETE /conversations/:id  — forget a conversation

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlchat_core::{Agent, ChatEvent, SqlChatConfig};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;

use crate::stream::spawn_chat_stream;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub pool: SqlitePool,
    pub agent: Arc<Agent>,
    pub config: SqlChatConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/chat/stream", get(stream_get_handler).post(stream_post_handler))
        .route("/conversations", post(create_conversation_handler))
        .route(
            "/conversations/:id",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("sqlchat HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: Option<String>,
    pub message: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn body(msg: impl Into<String>) -> serde_json::Value {
        serde_json::to_value(Self::new(msg)).unwrap_or_default()
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — queries the store and returns (status_code, json_body).
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let sqlite_version = match sqlchat_core::db::health_check(&state.pool).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    let tables = sqlchat_core::db::list_tables(&state.pool)
        .await
        .unwrap_or_default();

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "sqlite": sqlite_version,
            "tables": tables,
            "conversations": state.agent.memory().len().await,
        }),
    )
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner(model: &str) -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "model": model,
    })
}

/// Inner chat stream — validates the request and starts the agent turn.
///
/// Nothing is spawned when validation fails.
pub fn chat_stream_inner(
    state: &HttpState,
    req: ChatRequest,
) -> std::result::Result<mpsc::Receiver<ChatEvent>, (StatusCode, serde_json::Value)> {
    let conversation_id = match req.conversation_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                ErrorResponse::body("conversation_id is required"),
            ))
        }
    };
    let message = match req.message {
        Some(m) if !m.trim().is_empty() => m,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                ErrorResponse::body("message is required"),
            ))
        }
    };

    let (rx, _outcome) = spawn_chat_stream(
        state.agent.clone(),
        conversation_id,
        message,
        state.config.http.stream_buffer,
    );
    Ok(rx)
}

/// Inner create conversation — allocates a fresh id; the conversation itself
/// is created by its first message.
pub fn create_conversation_inner() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::CREATED,
        serde_json::json!({
            "conversation_id": uuid::Uuid::new_v4().to_string(),
        }),
    )
}

pub async fn get_conversation_inner(
    state: &HttpState,
    id: &str,
) -> (StatusCode, serde_json::Value) {
    match state.agent.memory().snapshot(id).await {
        Some(conversation) => (
            StatusCode::OK,
            serde_json::to_value(&conversation)
                .unwrap_or_else(|e| ErrorResponse::body(e.to_string())),
        ),
        None => (
            StatusCode::NOT_FOUND,
            ErrorResponse::body(format!("conversation {} not found", id)),
        ),
    }
}

pub async fn delete_conversation_inner(
    state: &HttpState,
    id: &str,
) -> (StatusCode, serde_json::Value) {
    if state.agent.memory().evict(id).await {
        tracing::info!(conversation_id = id, "Conversation evicted");
        (
            StatusCode::OK,
            serde_json::json!({"conversation_id": id, "deleted": true}),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            ErrorResponse::body(format!("conversation {} not found", id)),
        )
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner(state.agent.model_name())))
}

pub async fn stream_get_handler(
    State(state): State<Arc<HttpState>>,
    Query(req): Query<ChatRequest>,
) -> Response {
    stream_response(chat_stream_inner(&state, req))
}

pub async fn stream_post_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    stream_response(chat_stream_inner(&state, req))
}

pub async fn create_conversation_handler() -> impl IntoResponse {
    let (status, body) = create_conversation_inner();
    (status, Json(body))
}

pub async fn get_conversation_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = get_conversation_inner(&state, &id).await;
    (status, Json(body))
}

pub async fn delete_conversation_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = delete_conversation_inner(&state, &id).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn stream_response(
    result: std::result::Result<mpsc::Receiver<ChatEvent>, (StatusCode, serde_json::Value)>,
) -> Response {
    match result {
        Ok(rx) => event_stream(rx).into_response(),
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

/// One `data: <json>` SSE record per event, flushed as produced.
pub fn event_stream(
    rx: mpsc::Receiver<ChatEvent>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json_line())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
