//! Static request-to-tier routing.
//!
//! Rules are matched in order and the first match wins; anything that
//! matches no rule falls into the default tier.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{PolicySet, QuotaPolicy};

/// One routing rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// HTTP method to match; any method when absent
    #[serde(default)]
    pub method: Option<String>,
    /// Path prefix, matched on whole segments
    pub path_prefix: String,
    /// Tier assigned to matching requests
    pub tier: String,
}

impl RouteRule {
    pub fn new(method: Option<&str>, path_prefix: &str, tier: &str) -> Self {
        Self {
            method: method.map(str::to_string),
            path_prefix: path_prefix.to_string(),
            tier: tier.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    method: Option<Method>,
    path_prefix: String,
    policy: Arc<QuotaPolicy>,
}

impl CompiledRule {
    fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(ref m) = self.method {
            if m != method {
                return false;
            }
        }
        path_has_prefix(path, &self.path_prefix)
    }
}

/// `/api/auth` covers `/api/auth` and `/api/auth/login`, not `/api/authors`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// Routing table resolving every request to exactly one quota policy.
///
/// Every tier is resolved when the table is built, so classification can't
/// fail on the request path.
#[derive(Debug, Clone)]
pub struct TierRouter {
    rules: Vec<CompiledRule>,
    default_policy: Arc<QuotaPolicy>,
}

impl TierRouter {
    /// Compile `rules` against `policies`.
    ///
    /// Fails if a rule or the default names an unknown tier, a prefix doesn't
    /// start with `/`, or a method is not a valid HTTP method.
    pub fn new(rules: &[RouteRule], default_tier: &str, policies: &PolicySet) -> Result<Self> {
        let default_policy = policies.resolve(default_tier).map_err(|_| {
            TollgateError::Config(format!("default tier '{}' has no quota policy", default_tier))
        })?;

        let rules = rules
            .iter()
            .map(|rule| Self::compile(rule, policies))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            default_policy,
        })
    }

    fn compile(rule: &RouteRule, policies: &PolicySet) -> Result<CompiledRule> {
        if !rule.path_prefix.starts_with('/') {
            return Err(TollgateError::Config(format!(
                "route prefix '{}' must start with '/'",
                rule.path_prefix
            )));
        }

        let method = rule
            .method
            .as_deref()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| TollgateError::Config(format!("invalid HTTP method '{}'", m)))
            })
            .transpose()?;

        let policy = policies.resolve(&rule.tier).map_err(|_| {
            TollgateError::Config(format!(
                "route '{}' refers to unknown tier '{}'",
                rule.path_prefix, rule.tier
            ))
        })?;

        Ok(CompiledRule {
            method,
            path_prefix: rule.path_prefix.clone(),
            policy,
        })
    }

    /// The policy governing a request.
    pub fn classify(&self, method: &Method, path: &str) -> &Arc<QuotaPolicy> {
        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .map(|rule| &rule.policy)
            .unwrap_or(&self.default_policy)
    }

    /// The policy for requests matching no rule.
    pub fn default_policy(&self) -> &Arc<QuotaPolicy> {
        &self.default_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{FailureMode, TierPolicyConfig};
    use std::time::Duration;

    fn policies() -> PolicySet {
        PolicySet::from_configs(&[
            TierPolicyConfig::new("general", Duration::from_secs(900), 100, FailureMode::FailOpen),
            TierPolicyConfig::new("auth", Duration::from_secs(900), 5, FailureMode::FailClosed),
            TierPolicyConfig::new("reports", Duration::from_secs(3600), 10, FailureMode::FailOpen),
        ])
        .unwrap()
    }

    fn router() -> TierRouter {
        TierRouter::new(
            &[
                RouteRule::new(Some("post"), "/api/auth/login", "auth"),
                RouteRule::new(None, "/api/reports", "reports"),
                RouteRule::new(None, "/api", "general"),
            ],
            "general",
            &policies(),
        )
        .unwrap()
    }

    #[test]
    fn test_method_and_prefix_match() {
        let router = router();
        assert_eq!(router.classify(&Method::POST, "/api/auth/login").tier, "auth");
        assert_eq!(router.classify(&Method::GET, "/api/auth/login").tier, "general");
    }

    #[test]
    fn test_prefix_matches_whole_segments() {
        let router = router();
        assert_eq!(router.classify(&Method::GET, "/api/reports").tier, "reports");
        assert_eq!(router.classify(&Method::GET, "/api/reports/42/pdf").tier, "reports");
        assert_eq!(router.classify(&Method::GET, "/api/reportsx").tier, "general");
    }

    #[test]
    fn test_unmatched_uses_default() {
        let router = router();
        assert_eq!(router.classify(&Method::GET, "/healthz").tier, "general");
        assert_eq!(router.default_policy().tier, "general");
    }

    #[test]
    fn test_first_match_wins() {
        let router = TierRouter::new(
            &[
                RouteRule::new(None, "/api", "general"),
                RouteRule::new(None, "/api/reports", "reports"),
            ],
            "general",
            &policies(),
        )
        .unwrap();
        assert_eq!(router.classify(&Method::GET, "/api/reports").tier, "general");
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let result = TierRouter::new(&[RouteRule::new(None, "/x", "social-api")], "general", &policies());
        assert!(matches!(result, Err(TollgateError::Config(_))));

        let result = TierRouter::new(&[], "missing", &policies());
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        assert!(TierRouter::new(&[RouteRule::new(None, "api", "general")], "general", &policies()).is_err());
        assert!(TierRouter::new(&[RouteRule::new(Some("GE T"), "/api", "general")], "general", &policies()).is_err());
    }

    #[test]
    fn test_trailing_slash_prefix() {
        assert!(path_has_prefix("/static/app.js", "/static/"));
        assert!(path_has_prefix("/", "/"));
        assert!(!path_has_prefix("/stat", "/static/"));
    }
}
