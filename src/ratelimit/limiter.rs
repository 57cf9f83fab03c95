//! Core rate limiter implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::store::{CounterStore, StoreError, WindowCount};

use super::decision::Decision;
use super::key::RateKey;
use super::policy::{FailureMode, PolicySet, QuotaPolicy};

/// Default prefix for counter keys in the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "tollgate";
/// Default deadline for one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);
/// Retry hint given to callers denied because the store is unavailable.
const FAIL_CLOSED_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Fixed-window rate limiter over a shared counter store.
///
/// Each `(tier, client)` pair owns one counter per window. A window opens on
/// the first request and the store expires it after the tier's window
/// length, so a client can burst up to twice its limit across a window
/// boundary. That approximation buys O(1) storage and one store round trip
/// per request.
///
/// Correctness across processes rests on the store's atomic increment; this
/// type holds no per-key state of its own.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policies: PolicySet,
    key_prefix: String,
    store_timeout: Duration,
    /// Set while the store is failing; cleared on the next success
    store_degraded: AtomicBool,
    /// Number of distinct unavailability episodes seen
    store_outages: AtomicU64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.name())
            .field("policies", &self.policies)
            .field("key_prefix", &self.key_prefix)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter enforcing `policies` against `store`.
    pub fn new(store: Arc<dyn CounterStore>, policies: PolicySet) -> Self {
        Self {
            store,
            policies,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            store_degraded: AtomicBool::new(false),
            store_outages: AtomicU64::new(0),
        }
    }

    /// Namespace counter keys, e.g. per deployment sharing one store.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound every store call; slower replies count as unavailability.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The quota policies this limiter enforces.
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Check and consume one unit of quota for `client` in `tier`.
    ///
    /// An unknown tier is a configuration error. Callers on the request path
    /// should resolve tiers at startup and use [`Self::check_policy`].
    pub async fn check(&self, tier: &str, client: &str) -> Result<Decision> {
        let policy = self.policies.resolve(tier)?;
        Ok(self.check_policy(&policy, client).await)
    }

    /// Check and consume one unit of quota under an already resolved policy.
    pub async fn check_policy(&self, policy: &QuotaPolicy, client: &str) -> Decision {
        let key = RateKey::new(&policy.tier, client);
        let store_key = key.to_store_key(&self.key_prefix);

        trace!(key = %key, "Checking rate limit");

        match self.increment(store_key, policy.window).await {
            Ok(window) => {
                self.on_store_success();
                Self::decide(policy, &key, window)
            }
            Err(e) => {
                self.on_store_failure(&e);
                match policy.failure_mode {
                    FailureMode::FailOpen => Decision::fail_open(policy.max_requests, policy.window),
                    FailureMode::FailClosed => {
                        Decision::fail_closed(policy.max_requests, FAIL_CLOSED_RETRY_AFTER)
                    }
                }
            }
        }
    }

    fn decide(policy: &QuotaPolicy, key: &RateKey, window: WindowCount) -> Decision {
        if window.count <= policy.max_requests {
            Decision::allowed(
                policy.max_requests,
                policy.max_requests - window.count,
                window.ttl_remaining,
            )
        } else {
            debug!(
                key = %key,
                count = window.count,
                limit = policy.max_requests,
                retry_after_ms = window.ttl_remaining.as_millis() as u64,
                "Rate limit exceeded"
            );
            Decision::denied(policy.max_requests, window.ttl_remaining)
        }
    }

    /// Run the increment on its own task under the store deadline.
    ///
    /// If the caller is cancelled the spawned increment still completes, so
    /// cancellation can over-count but never under-count.
    async fn increment(&self, key: String, window: Duration) -> std::result::Result<WindowCount, StoreError> {
        let store = Arc::clone(&self.store);
        let task = tokio::spawn(async move { store.increment(&key, window).await });

        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(StoreError::Unavailable(format!(
                "store task failed: {}",
                join_error
            ))),
            Err(_) => Err(StoreError::Unavailable(format!(
                "no reply within {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }

    fn on_store_success(&self) {
        if self.store_degraded.swap(false, Ordering::AcqRel) {
            info!(store = self.store.name(), "Counter store recovered");
        }
    }

    /// Log the first failure of an episode loudly and the rest quietly.
    fn on_store_failure(&self, error: &StoreError) {
        if !self.store_degraded.swap(true, Ordering::AcqRel) {
            self.store_outages.fetch_add(1, Ordering::Relaxed);
            warn!(
                store = self.store.name(),
                error = %error,
                "Counter store unavailable, applying tier failure modes"
            );
        } else {
            debug!(store = self.store.name(), error = %error, "Counter store still unavailable");
        }
    }

    /// Whether the last store call failed.
    pub fn is_store_degraded(&self) -> bool {
        self.store_degraded.load(Ordering::Acquire)
    }

    /// Number of unavailability episodes since startup.
    pub fn store_outages(&self) -> u64 {
        self.store_outages.load(Ordering::Relaxed)
    }
}
