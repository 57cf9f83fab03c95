//! Request governance middleware.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TollgateConfig;
use crate::error::Result;
use crate::metrics::{Labels, MetricsAggregator, RATE_LIMIT_DECISIONS_TOTAL};
use crate::ratelimit::{Decision, QuotaPolicy, RateLimiter};
use crate::store::CounterStore;

use super::client::client_identifier;
use super::router::TierRouter;
use super::tracker::RequestTracker;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// What the governance layer needs to know about an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub client_identifier: String,
    /// Matched route template, or the raw path when routing hasn't run yet
    pub route_template: String,
}

/// Body of a throttling response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleBody {
    pub error: String,
    /// Seconds to wait before retrying
    pub retry_after: String,
}

/// Shared state of the governance middleware.
#[derive(Debug)]
pub struct Governance {
    limiter: Arc<RateLimiter>,
    router: TierRouter,
    metrics: Arc<MetricsAggregator>,
    trust_forwarded_headers: bool,
}

impl Governance {
    pub fn new(limiter: Arc<RateLimiter>, router: TierRouter, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            limiter,
            router,
            metrics,
            trust_forwarded_headers: false,
        }
    }

    /// Take client addresses from `X-Forwarded-For` / `X-Real-IP`.
    pub fn with_trusted_forwarding(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// Wire up the limiter and routing table from configuration.
    pub fn from_config(
        config: &TollgateConfig,
        store: Arc<dyn CounterStore>,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<Self> {
        let policies = config.policy_set()?;
        let router = config.tier_router(&policies)?;
        let limiter = RateLimiter::new(store, policies)
            .with_key_prefix(config.store.key_prefix.clone())
            .with_store_timeout(config.store.timeout());

        for policy in limiter.policies().iter() {
            info!(
                tier = %policy.tier,
                window_ms = policy.window.as_millis() as u64,
                max_requests = policy.max_requests,
                failure_mode = ?policy.failure_mode,
                "Loaded quota policy"
            );
        }
        info!(
            tiers = limiter.policies().len(),
            routes = config.governance.routes.len(),
            default_tier = %config.governance.default_tier,
            "Request governance configured"
        );

        Ok(Self::new(Arc::new(limiter), router, metrics)
            .with_trusted_forwarding(config.governance.trust_forwarded_headers))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn router(&self) -> &TierRouter {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Build the descriptor for an inbound request.
    pub fn describe(&self, request: &Request) -> RequestDescriptor {
        let path = request.uri().path().to_string();
        let route_template = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| path.clone());

        RequestDescriptor {
            method: request.method().clone(),
            client_identifier: client_identifier(request, self.trust_forwarded_headers),
            path,
            route_template,
        }
    }

    /// Classify a request and consume one unit of its tier's quota.
    pub async fn admit(&self, descriptor: &RequestDescriptor) -> (Arc<QuotaPolicy>, Decision) {
        let policy = Arc::clone(self.router.classify(&descriptor.method, &descriptor.path));
        let decision = self
            .limiter
            .check_policy(&policy, &descriptor.client_identifier)
            .await;

        let labels = Labels::new()
            .with("tier", policy.tier.as_str())
            .with("outcome", decision.outcome.as_str());
        self.metrics.increment(RATE_LIMIT_DECISIONS_TOTAL, &labels);

        (policy, decision)
    }

    /// Put the governance middleware in front of every route of `router`.
    pub fn layer<S>(self: Arc<Self>, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(self, governance_middleware))
    }
}

/// Governance middleware: classify, check quota, then forward or throttle.
///
/// Every request is recorded exactly once in the metrics, whichever way it
/// leaves.
pub async fn governance_middleware(
    State(governance): State<Arc<Governance>>,
    request: Request,
    next: Next,
) -> Response {
    let descriptor = governance.describe(&request);
    let tracker = RequestTracker::start(
        Arc::clone(&governance.metrics),
        descriptor.method.as_str(),
        &descriptor.route_template,
    );

    let (policy, decision) = governance.admit(&descriptor).await;

    if !decision.allowed {
        debug!(
            tier = %policy.tier,
            client = %descriptor.client_identifier,
            path = %descriptor.path,
            outcome = %decision.outcome,
            "Request throttled"
        );
        let response = throttled_response(&policy, &decision);
        tracker.finish(response.status());
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    tracker.finish(response.status());
    response
}

/// The 429 response for a denied request.
pub fn throttled_response(policy: &QuotaPolicy, decision: &Decision) -> Response {
    let retry_after = ceil_secs(decision.retry_after.unwrap_or(decision.reset_after));

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ThrottleBody {
            error: policy.message.clone(),
            retry_after: retry_after.to_string(),
        }),
    )
        .into_response();

    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, decision);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Set `X-RateLimit-Limit`, `-Remaining` and `-Reset` (unix seconds).
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    let reset_at = Utc::now().timestamp().max(0) as u64 + ceil_secs(decision.reset_after);

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at));
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::FailureMode;
    use crate::store::MemoryCounterStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(1000)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(1001)), 2);
    }

    #[test]
    fn test_throttled_response_headers() {
        let policy = QuotaPolicy::new("auth", Duration::from_secs(900), 5, FailureMode::FailClosed).unwrap();
        let decision = Decision::denied(5, Duration::from_millis(840_500));

        let response = throttled_response(&policy, &decision);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[axum::http::header::RETRY_AFTER], "841");

        let reset: u64 = headers[X_RATELIMIT_RESET].to_str().unwrap().parse().unwrap();
        assert!(reset >= Utc::now().timestamp() as u64 + 840);
    }

    /// Counts events whose message equals `message`.
    struct EventCounter {
        message: &'static str,
        hits: Arc<AtomicUsize>,
    }

    #[derive(Default)]
    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for EventCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            if visitor.0 == self.message {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_startup_logs_each_policy_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(EventCounter {
            message: "Loaded quota policy",
            hits: hits.clone(),
        });

        tracing::subscriber::with_default(subscriber, || {
            let config = TollgateConfig::from_yaml("metrics:\n  allow_reset: false\n").unwrap();
            Governance::from_config(
                &config,
                Arc::new(MemoryCounterStore::new()),
                Arc::new(MetricsAggregator::new()),
            )
            .unwrap();
        });

        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
