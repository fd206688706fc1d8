// src/api.rs
//! Optional status surface: health, live scheduler status, Prometheus
//! exposition and a manual cycle trigger.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/cycle", post(trigger_cycle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(h) => (StatusCode::OK, h.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// 202 when the request was handed to the loop, 409 when a cycle is running.
async fn trigger_cycle(State(state): State<AppState>) -> impl IntoResponse {
    if state.scheduler.trigger() {
        (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "accepted": false, "reason": "cycle_in_progress" })),
        )
    }
}

/// Serve until `cancel` fires.
pub async fn serve(bind: &str, state: AppState, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding status server to {bind}"))?;
    tracing::info!(addr = %bind, "status server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("status server failed")
}
