//! Rate key generation.

/// Identity of one counter: a tier and the client being accounted.
///
/// The client is usually the caller's network address or its authenticated
/// subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    /// The tier whose quota applies
    pub tier: String,
    /// The client identifier
    pub client: String,
}

impl RateKey {
    /// Create a new rate key.
    pub fn new(tier: &str, client: &str) -> Self {
        Self {
            tier: tier.to_string(),
            client: client.to_string(),
        }
    }

    /// Render the key the way the counter store addresses it.
    ///
    /// Format: `{prefix}:{tier}:{client}`. Tier names cannot contain `:`,
    /// so the client part may (IPv6 addresses do) without collisions.
    pub fn to_store_key(&self, prefix: &str) -> String {
        format!("{}:{}:{}", prefix, self.tier, self.client)
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tier, self.client)
    }
}
