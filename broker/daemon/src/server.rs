//! HTTP Server
//!
//! Routes requests to the generation facade and the session broker:
//!
//! ```text
//!   POST /generate/generate_response        {prompt, options} ──► {"text": ...}
//!   POST /generate/start_stream             {prompt, options} ──► {"token": ...}
//!   GET  /generate/stream_response/:token   ──► text/event-stream of "data: ...\n\n"
//!   GET  /health                            ──► backend and session summary
//! ```
//!
//! Streaming is split in two calls: `start_stream` parks the backend stream
//! in the broker and returns a token; `stream_response` drains it exactly
//! once. Each framed payload is written to the client as soon as the
//! backend produces it.

use std::convert::Infallible;
use std::future::Future;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use broker_core::{
    BackendError, GenerationOptions, Generator, Prompt, SessionBroker, SessionError, SessionToken,
};

/// Shared handles every request is served with
#[derive(Clone, Debug)]
pub struct AppState {
    generator: Generator,
    broker: SessionBroker,
}

impl AppState {
    /// Bundle the facade and the broker
    #[must_use]
    pub fn new(generator: Generator, broker: SessionBroker) -> Self {
        Self { generator, broker }
    }

    /// The session broker
    #[must_use]
    pub fn broker(&self) -> &SessionBroker {
        &self.broker
    }
}

/// Body of both generation routes
#[derive(Clone, Debug, Deserialize)]
pub struct GenerateRequest {
    /// Pre-built prompt text
    pub prompt: Prompt,
    /// Validated request options
    pub options: GenerationOptions,
}

/// Completed generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text
    pub text: String,
}

/// Handle for a parked stream
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartStreamResponse {
    /// Token to pass to `stream_response`
    pub token: SessionToken,
}

/// Errors surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    /// Backend call failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Session lookup failed
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Session(SessionError::UnknownToken(_)) => StatusCode::NOT_FOUND,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Backend(e) => e.kind(),
            Self::Session(SessionError::UnknownToken(_)) => "unknown_token",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate/generate_response", post(generate_response))
        .route("/generate/start_stream", post(start_stream))
        .route("/generate/stream_response/:token", get(stream_response))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Broker HTTP server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn generate_response(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    debug!(ui_level = request.options.ui_level(), "Generate request");

    let text = state
        .generator
        .generate(&request.prompt, &request.options)
        .await
        .inspect_err(|e| warn!(error = %e, "Generation failed"))?;

    Ok(Json(GenerateResponse { text }))
}

async fn start_stream(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<StartStreamResponse>, ApiError> {
    let token = state
        .generator
        .start_stream(&state.broker, &request.prompt, &request.options)
        .await
        .inspect_err(|e| warn!(error = %e, "Failed to start stream"))?;

    info!(token = %token, ui_level = request.options.ui_level(), "Stream started");
    Ok(Json(StartStreamResponse { token }))
}

async fn stream_response(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let token = SessionToken::from(token);
    let payloads = state
        .broker
        .consume(&token)
        .inspect_err(|e| debug!(error = %e, "Rejected stream request"))?;

    info!(token = %token, "Streaming response to client");

    let body = Body::from_stream(payloads.map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let healthy = state.generator.health_check().await;
    Json(serde_json::json!({
        "status": "ok",
        "backend": state.generator.backend_kind(),
        "healthy": healthy,
        "active_sessions": state.broker.len(),
    }))
}
