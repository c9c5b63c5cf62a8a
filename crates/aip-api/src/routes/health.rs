//! # Health Probes and Metrics Exposition
//!
//! Liveness answers as long as the process runs. Readiness round-trips the
//! catalog and queries the object store's capacity, so a probe fails while
//! either backend is unreachable.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(prometheus_metrics))
}

/// Liveness probe: always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/liveness",
    responses((status = 200, description = "Process is alive", body = String)),
    tag = "health"
)]
pub async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 when the catalog and the object store answer.
#[utoipa::path(
    get,
    path = "/health/readiness",
    responses(
        (status = 200, description = "Backends reachable", body = String),
        (status = 503, description = "A backend is unreachable", body = String),
    ),
    tag = "health"
)]
pub async fn readiness(State(state): State<AppState>) -> Response {
    match state.service.ready().await {
        Ok(()) => "ready".into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
        }
    }
}

/// GET /metrics: Prometheus text exposition, 404 when metrics are disabled.
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
