//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{Result, TollgateError};
use crate::http::{RouteRule, TierRouter};
use crate::metrics::DEFAULT_MAX_SERIES;
use crate::ratelimit::{FailureMode, PolicySet, TierPolicyConfig, DEFAULT_KEY_PREFIX};
use crate::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// Prefix for environment overrides, e.g. `TOLLGATE__STORE__BACKEND=redis`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Tiers, quotas and routing
    #[serde(default)]
    pub governance: GovernanceConfig,

    /// Metrics aggregation and export
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Which counter store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process counters; correct only for a single server process
    #[default]
    Memory,
    /// Redis-compatible server shared by every process
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for the Redis backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline for one store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// How often the memory backend drops expired windows
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_store_timeout_ms(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    /// Open the configured counter store.
    ///
    /// A Redis backend that can't be reached is an error: quietly counting
    /// per process would multiply every quota by the replica count. Once
    /// running, store failures go through each tier's failure mode.
    ///
    /// The memory backend starts its purge task, so this needs a runtime.
    pub async fn connect_store(&self) -> Result<Arc<dyn CounterStore>> {
        match self.backend {
            StoreBackend::Redis => {
                let store = RedisCounterStore::connect(&self.redis_url, self.timeout())
                    .await
                    .map_err(|e| {
                        error!(url = %self.redis_url, error = %e, "Counter store unreachable");
                        e
                    })?;
                info!(url = %self.redis_url, "Using Redis counter store");
                Ok(Arc::new(store))
            }
            StoreBackend::Memory => {
                info!("Using in-memory counter store");
                let store = Arc::new(MemoryCounterStore::new());
                Arc::clone(&store).start_purge_task(self.purge_interval());
                Ok(store)
            }
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_store_timeout_ms() -> u64 {
    50
}

fn default_purge_interval() -> u64 {
    60
}

/// Tier quotas and the routing table that assigns requests to tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Tier for requests no route matches
    #[serde(default = "default_tier")]
    pub default_tier: String,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that sets these headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,

    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierPolicyConfig>,

    #[serde(default = "default_routes")]
    pub routes: Vec<RouteRule>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            trust_forwarded_headers: false,
            tiers: default_tiers(),
            routes: default_routes(),
        }
    }
}

fn default_tier() -> String {
    "general".to_string()
}

fn default_tiers() -> Vec<TierPolicyConfig> {
    let mut auth = TierPolicyConfig::new("auth", Duration::from_secs(15 * 60), 5, FailureMode::FailClosed);
    auth.message = Some("Too many authentication attempts, please try again later.".to_string());

    vec![
        TierPolicyConfig::new("general", Duration::from_secs(15 * 60), 100, FailureMode::FailOpen),
        auth,
        TierPolicyConfig::new("social-api", Duration::from_secs(60), 30, FailureMode::FailOpen),
        TierPolicyConfig::new("reports", Duration::from_secs(60 * 60), 10, FailureMode::FailOpen),
    ]
}

fn default_routes() -> Vec<RouteRule> {
    vec![
        RouteRule::new(None, "/api/auth", "auth"),
        RouteRule::new(None, "/api/social", "social-api"),
        RouteRule::new(None, "/api/reports", "reports"),
    ]
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Path serving the metrics snapshot
    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Cap on distinct series
    #[serde(default = "default_max_series")]
    pub max_series: usize,

    /// Mount `POST {path}/reset`
    #[serde(default)]
    pub allow_reset: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
            max_series: default_max_series(),
            allow_reset: false,
        }
    }
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_max_series() -> usize {
    DEFAULT_MAX_SERIES
}

impl TollgateConfig {
    /// Load configuration from an optional file, then `TOLLGATE__*`
    /// environment variables, and validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: TollgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that would otherwise fail later at startup.
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(TollgateError::Config("store.timeout_ms must be greater than 0".into()));
        }
        if self.store.purge_interval_secs == 0 {
            return Err(TollgateError::Config(
                "store.purge_interval_secs must be greater than 0".into(),
            ));
        }
        if !self.metrics.path.starts_with('/') {
            return Err(TollgateError::Config(format!(
                "metrics.path must start with '/', got '{}'",
                self.metrics.path
            )));
        }

        let policies = self.policy_set()?;
        self.tier_router(&policies)?;
        Ok(())
    }

    /// Build the quota policies.
    pub fn policy_set(&self) -> Result<PolicySet> {
        PolicySet::from_configs(&self.governance.tiers)
    }

    /// Build the routing table against a policy set.
    pub fn tier_router(&self, policies: &PolicySet) -> Result<TierRouter> {
        TierRouter::new(&self.governance.routes, &self.governance.default_tier, policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TollgateConfig::default();
        config.validate().unwrap();

        let policies = config.policy_set().unwrap();
        assert_eq!(policies.len(), 4);
        let auth = policies.resolve("auth").unwrap();
        assert_eq!(auth.max_requests, 5);
        assert_eq!(auth.window, Duration::from_millis(900_000));
        assert_eq!(auth.failure_mode, FailureMode::FailClosed);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9000"
store:
  backend: redis
  redis_url: "redis://cache:6379"
  timeout_ms: 25
governance:
  trust_forwarded_headers: true
  tiers:
    - tier: general
      window_ms: 60000
      max_requests: 100
    - tier: auth
      window_ms: 900000
      max_requests: 5
      failure_mode: fail_closed
      message: "Too many login attempts"
  routes:
    - method: POST
      path_prefix: /login
      tier: auth
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.timeout(), Duration::from_millis(25));
        assert_eq!(config.store.key_prefix, "tollgate");
        assert!(config.governance.trust_forwarded_headers);
        assert_eq!(config.governance.tiers.len(), 2);
        assert_eq!(config.governance.routes.len(), 1);
        assert_eq!(config.metrics.path, "/metrics");
    }

    #[test]
    fn test_route_to_unknown_tier_rejected() {
        let yaml = r#"
governance:
  tiers:
    - tier: general
      window_ms: 60000
      max_requests: 100
  routes:
    - path_prefix: /api/reports
      tier: reports
"#;
        assert!(matches!(
            TollgateConfig::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_missing_default_tier_rejected() {
        let yaml = r#"
governance:
  default_tier: general
  tiers:
    - tier: auth
      window_ms: 60000
      max_requests: 5
  routes: []
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let yaml = r#"
governance:
  tiers:
    - tier: general
      window_ms: 0
      max_requests: 100
  routes: []
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[tokio::test]
    async fn test_memory_store_backend() {
        let store = StoreConfig::default().connect_store().await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_unreachable_redis_is_fatal() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:1/".to_string(),
            ..StoreConfig::default()
        };

        let result = config.connect_store().await;
        assert!(matches!(
            result,
            Err(TollgateError::Store(crate::store::StoreError::Unavailable(_)))
        ));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TollgateConfig::load(None).unwrap();
        assert_eq!(config.governance.default_tier, "general");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "metrics:\n  allow_reset: true\n  max_series: 50\n").unwrap();

        let config = TollgateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(config.metrics.allow_reset);
        assert_eq!(config.metrics.max_series, 50);
        assert_eq!(config.governance.tiers.len(), 4);
    }
}
