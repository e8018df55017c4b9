//! HTTP intake and operations endpoints.
//!
//! `POST /api/push` feeds the notification queue; `GET /api/stat/app`
//! exposes the counter snapshot; `/healthz` and `/metrics` serve probes
//! and Prometheus scrapes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::Result;
use crate::metrics::Metrics;
use crate::notification::RequestPush;
use crate::push::queue::PushQueue;
use crate::stats::{self, StatStorage};

/// Shared state for API handlers.
pub struct ApiState {
    pub queue: Arc<PushQueue>,
    pub stats: Arc<dyn StatStorage>,
    pub metrics: Metrics,
}

/// The gateway's HTTP server.
pub struct ApiServer {
    bind_address: String,
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(port: u16, state: Arc<ApiState>) -> Self {
        Self {
            bind_address: format!("0.0.0.0:{port}"),
            state,
        }
    }

    /// Serve until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(&self.bind_address).await.map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("failed to bind API server to '{}': {}", self.bind_address, e),
            )
        })?;
        info!(address = %self.bind_address, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
                info!("API server shutting down");
            })
            .await?;

        Ok(())
    }
}

fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/push", post(push_handler))
        .route("/api/stat/app", get(stat_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn push_handler(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RequestPush>,
) -> impl IntoResponse {
    if req.notifications.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": "fail", "error": "notifications required"})),
        );
    }

    let counts = state.queue.enqueue(req).await;
    (
        StatusCode::OK,
        Json(json!({"success": "ok", "counts": counts})),
    )
}

async fn stat_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(stats::snapshot(state.stats.as_ref()).await)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn metrics_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let metric_families = state.metrics.gather();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        );
    }

    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid metrics encoding: {e}"),
        ),
    }
}
