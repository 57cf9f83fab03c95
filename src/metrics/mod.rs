//! In-process request metrics.
//!
//! One [`MetricsAggregator`] is built at startup and shared by everything
//! that records traffic; there is no global registry.

mod aggregator;
mod labels;
mod snapshot;

pub use aggregator::{MetricsAggregator, DEFAULT_MAX_SERIES};
pub use labels::Labels;
pub use snapshot::{MetricEntry, MetricsSnapshot};

/// Requests seen, labelled by method, route and status.
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// Request wall-clock duration in milliseconds, same labels.
pub const HTTP_REQUEST_DURATION_MS: &str = "http_request_duration_ms";
/// Requests that ended with a status of 400 or above, same labels.
pub const HTTP_ERRORS_TOTAL: &str = "http_errors_total";
/// Limiter decisions, labelled by tier and outcome.
pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "rate_limit_decisions_total";
/// Cache lookups, labelled by cache and result.
pub const CACHE_REQUESTS_TOTAL: &str = "cache_requests_total";
/// Samples the aggregator had to drop.
pub const METRICS_INTERNAL_ERRORS: &str = "metrics_internal_errors";
