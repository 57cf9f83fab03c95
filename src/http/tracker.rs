//! Per-request metric recording.

use axum::http::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::metrics::{
    Labels, MetricsAggregator, HTTP_ERRORS_TOTAL, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_MS,
};

/// Status label for requests dropped before a response was produced.
pub const CANCELLED_STATUS: u16 = 499;

/// Records one request's duration, count and error outcome exactly once.
///
/// Call [`RequestTracker::finish`] with the final status. If the tracker is
/// dropped first (the request future was cancelled or the handler panicked),
/// it records with status [`CANCELLED_STATUS`].
#[derive(Debug)]
pub struct RequestTracker {
    metrics: Arc<MetricsAggregator>,
    method: String,
    route: String,
    started: Instant,
    recorded: bool,
}

impl RequestTracker {
    /// Start timing a request.
    pub fn start(metrics: Arc<MetricsAggregator>, method: &str, route: &str) -> Self {
        Self {
            metrics,
            method: method.to_string(),
            route: route.to_string(),
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Record the request with its final status.
    pub fn finish(mut self, status: StatusCode) {
        self.record(status.as_u16());
    }

    fn record(&mut self, status: u16) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        let labels = Labels::new()
            .with("method", self.method.as_str())
            .with("route", self.route.as_str())
            .with("status", status.to_string());

        self.metrics
            .record_duration(HTTP_REQUEST_DURATION_MS, self.started.elapsed(), &labels);
        self.metrics.increment(HTTP_REQUESTS_TOTAL, &labels);
        if status >= 400 {
            self.metrics.increment(HTTP_ERRORS_TOTAL, &labels);
        }
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        if !self.recorded {
            debug!(method = %self.method, route = %self.route, "Request ended without a response");
            self.record(CANCELLED_STATUS);
        }
    }
}
