//! Operational endpoints: metrics export and health.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::ratelimit::RateLimiter;

/// Serve the current metrics snapshot.
pub async fn metrics_handler(State(metrics): State<Arc<MetricsAggregator>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Clear all metrics.
pub async fn reset_metrics_handler(State(metrics): State<Arc<MetricsAggregator>>) -> StatusCode {
    metrics.reset();
    info!("Metrics reset via admin endpoint");
    StatusCode::NO_CONTENT
}

/// Router exposing the metrics snapshot at `path`, plus `POST {path}/reset`
/// when `allow_reset` is set.
pub fn metrics_router(metrics: Arc<MetricsAggregator>, path: &str, allow_reset: bool) -> Router {
    let mut router = Router::new().route(path, get(metrics_handler));
    if allow_reset {
        let reset_path = format!("{}/reset", path.trim_end_matches('/'));
        router = router.route(&reset_path, post(reset_metrics_handler));
    }
    router.with_state(metrics)
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub store_degraded: bool,
}

/// Liveness plus whether the counter store is currently failing.
pub async fn health_handler(State(limiter): State<Arc<RateLimiter>>) -> Json<HealthBody> {
    let store_degraded = limiter.is_store_degraded();
    Json(HealthBody {
        status: if store_degraded { "degraded" } else { "ok" },
        store_degraded,
    })
}

/// Router exposing `GET /healthz`.
pub fn health_router(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .with_state(limiter)
}

/// Health and metrics endpoints together.
///
/// Merge this next to a governed router rather than under it: pollers hit
/// these paths on a schedule and must not spend client quota.
pub fn operational_router(
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsAggregator>,
    metrics_path: &str,
    allow_reset: bool,
) -> Router {
    health_router(limiter).merge(metrics_router(metrics, metrics_path, allow_reset))
}
