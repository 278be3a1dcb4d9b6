// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! HTTP surface
//!
//! Three routes: a streamed chat endpoint, an idempotent session delete,
//! and a liveness marker. The chat response body is the orchestrator's
//! text stream forwarded chunk by chunk; the session id travels in the
//! `X-Session-Id` response header.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        header::{HeaderName, HeaderValue},
        StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::chat::ChatEngine;
use crate::error::Result;
use crate::session::SessionStore;

/// Maximum inbound message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
struct AppState {
    engine: ChatEngine,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    session_id: Option<String>,
}

/// Build the application router.
pub fn router(engine: ChatEngine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/chat/{session_id}", delete(clear_session))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Bind and serve until the process is stopped.
pub async fn run(bind_address: &str, engine: ChatEngine) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(bind_address, "listening");
    axum::serve(listener, router(engine))
        .await
        .map_err(crate::error::KaapiError::Io)?;
    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "Kaapi API is running" }))
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("message exceeds {} characters", MAX_MESSAGE_CHARS),
        )
            .into_response();
    }

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // The id goes back out as a header; reject anything that cannot.
    let Ok(session_header) = HeaderValue::from_str(&session_id) else {
        return (StatusCode::UNPROCESSABLE_ENTITY, "invalid session id").into_response();
    };

    let stream = state
        .engine
        .handle_message(session_id, request.message)
        .map(|chunk| Ok::<_, std::convert::Infallible>(chunk.into_bytes()));

    let mut response = Response::new(Body::from_stream(stream));
    response
        .headers_mut()
        .insert(HeaderName::from_static(SESSION_HEADER), session_header);
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if state.engine.sessions().remove(&session_id) {
        info!(session_id = %session_id, "session_cleared");
    }
    // Always acknowledge, even for ids that never existed.
    Json(serde_json::json!({ "status": "session cleared" }))
}
