//! jobdigest HTTP control API
//!
//! Axum server for operators and the CLI. Each endpoint has a thin handler
//! that delegates to an inner function returning `(StatusCode, json)`, so the
//! logic is testable without going through axum dispatch.
//!
//! Endpoints:
//! - GET  /health        - liveness and version
//! - GET  /status        - last cycle, outbox size, running flag
//! - POST /cycle         - run a cycle now
//! - POST /outbox/flush  - retry delivery of retained reports

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use jobdigest_core::config::HttpConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::subsystems::pipeline::CycleError;
use crate::subsystems::runner::CycleRunner;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub runner: Arc<CycleRunner>,
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/cycle", post(cycle_handler))
        .route("/outbox/flush", post(flush_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    runner: Arc<CycleRunner>,
    config: HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(HttpState { runner }));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("jobdigest HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner functions
// ============================================================================

pub fn health_inner() -> serde_json::Value {
    serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    })
}

pub async fn status_inner(runner: &CycleRunner) -> (StatusCode, serde_json::Value) {
    let outbox = runner.outbox_len().await;
    (
        StatusCode::OK,
        serde_json::json!({
            "running": runner.is_running(),
            "outbox": outbox,
            "last_cycle": runner.last_cycle(),
            "last_error": runner.last_error(),
        }),
    )
}

pub async fn cycle_inner(runner: &CycleRunner) -> (StatusCode, serde_json::Value) {
    match runner.run_once().await {
        Ok(summary) => (
            StatusCode::OK,
            serde_json::to_value(summary).unwrap_or_else(|_| serde_json::json!({})),
        ),
        Err(e @ CycleError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": e.to_string(), "status": "error" }),
        ),
        Err(e @ CycleError::InboxUnavailable(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "error": e.to_string(), "status": "error" }),
        ),
    }
}

pub async fn flush_inner(runner: &CycleRunner) -> (StatusCode, serde_json::Value) {
    let result = runner.flush_outbox().await;
    (
        StatusCode::OK,
        serde_json::json!({
            "delivered": result.delivered,
            "remaining": result.remaining,
        }),
    )
}

// ============================================================================
// Axum handlers
// ============================================================================

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(health_inner()))
}

pub async fn status_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = status_inner(&state.runner).await;
    (status, Json(body))
}

pub async fn cycle_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = cycle_inner(&state.runner).await;
    (status, Json(body))
}

pub async fn flush_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = flush_inner(&state.runner).await;
    (status, Json(body))
}
