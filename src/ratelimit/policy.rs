//! Quota policies and the per-process policy set.
//!
//! Policies are built once at startup from configuration and shared
//! read-only afterwards. Changing a limit means building a new [`PolicySet`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Message placed in throttling responses when a tier doesn't define one.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Longest window a policy may use.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// What to do when the shared counter store can't be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Treat the request as allowed.
    #[default]
    FailOpen,
    /// Treat the request as denied.
    FailClosed,
}

/// A tier's quota as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicyConfig {
    /// Tier identifier, e.g. `general` or `auth`
    pub tier: String,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Behaviour when the counter store is unavailable
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Message returned to throttled callers
    #[serde(default)]
    pub message: Option<String>,
}

impl TierPolicyConfig {
    /// Convenience constructor used for built-in defaults and tests.
    pub fn new(tier: &str, window: Duration, max_requests: u64, failure_mode: FailureMode) -> Self {
        Self {
            tier: tier.to_string(),
            window_ms: window.as_millis() as u64,
            max_requests,
            failure_mode,
            message: None,
        }
    }
}

/// Immutable quota for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Tier this policy governs
    pub tier: String,
    /// Length of one counting window
    pub window: Duration,
    /// Requests allowed per window and client
    pub max_requests: u64,
    /// Behaviour when the counter store is unavailable
    pub failure_mode: FailureMode,
    /// Fixed message returned to throttled callers
    pub message: String,
}

impl QuotaPolicy {
    /// Create a validated policy.
    pub fn new(
        tier: &str,
        window: Duration,
        max_requests: u64,
        failure_mode: FailureMode,
    ) -> Result<Self> {
        validate_tier_name(tier)?;

        if window.as_millis() == 0 {
            return Err(TollgateError::Config(format!(
                "tier '{}': window must be at least 1ms",
                tier
            )));
        }
        if window > MAX_WINDOW {
            return Err(TollgateError::Config(format!(
                "tier '{}': window must be at most {}s",
                tier,
                MAX_WINDOW.as_secs()
            )));
        }
        if max_requests == 0 {
            return Err(TollgateError::Config(format!(
                "tier '{}': max_requests must be greater than 0",
                tier
            )));
        }

        Ok(Self {
            tier: tier.to_string(),
            window,
            max_requests,
            failure_mode,
            message: DEFAULT_MESSAGE.to_string(),
        })
    }

    /// Replace the throttling message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl TryFrom<&TierPolicyConfig> for QuotaPolicy {
    type Error = TollgateError;

    fn try_from(config: &TierPolicyConfig) -> Result<Self> {
        let policy = QuotaPolicy::new(
            &config.tier,
            Duration::from_millis(config.window_ms),
            config.max_requests,
            config.failure_mode,
        )?;

        Ok(match &config.message {
            Some(message) => policy.with_message(message.clone()),
            None => policy,
        })
    }
}

/// Tier names end up inside store keys, so keep them to a safe alphabet.
fn validate_tier_name(tier: &str) -> Result<()> {
    let valid = !tier.is_empty()
        && tier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(TollgateError::Config(format!(
            "invalid tier name '{}': use ASCII letters, digits, '-' or '_'",
            tier
        )))
    }
}

/// All quota policies known to this process, keyed by tier.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: HashMap<String, Arc<QuotaPolicy>>,
}

impl PolicySet {
    /// Build a policy set, rejecting duplicate tiers.
    pub fn new(policies: impl IntoIterator<Item = QuotaPolicy>) -> Result<Self> {
        let mut map = HashMap::new();
        for policy in policies {
            let tier = policy.tier.clone();
            if map.insert(tier.clone(), Arc::new(policy)).is_some() {
                return Err(TollgateError::Config(format!("tier '{}' defined twice", tier)));
            }
        }
        Ok(Self { policies: map })
    }

    /// Build a policy set from configuration entries.
    pub fn from_configs(configs: &[TierPolicyConfig]) -> Result<Self> {
        let policies = configs
            .iter()
            .map(QuotaPolicy::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::new(policies)
    }

    /// Look up the policy for a tier.
    pub fn get(&self, tier: &str) -> Option<&Arc<QuotaPolicy>> {
        self.policies.get(tier)
    }

    /// Look up the policy for a tier, treating an unknown tier as a
    /// configuration error.
    pub fn resolve(&self, tier: &str) -> Result<Arc<QuotaPolicy>> {
        self.get(tier)
            .cloned()
            .ok_or_else(|| TollgateError::Config(format!("unknown tier '{}'", tier)))
    }

    /// Whether a tier is defined.
    pub fn contains(&self, tier: &str) -> bool {
        self.policies.contains_key(tier)
    }

    /// Every policy, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<QuotaPolicy>> {
        self.policies.values()
    }

    /// Names of all defined tiers.
    pub fn tiers(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
