//! Rate limiting logic: quota policies, rate keys and the limiter engine.

mod decision;
mod key;
mod limiter;
mod policy;

pub use decision::{Decision, Outcome};
pub use key::RateKey;
pub use limiter::{RateLimiter, DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
pub use policy::{FailureMode, PolicySet, QuotaPolicy, TierPolicyConfig, DEFAULT_MESSAGE, MAX_WINDOW};
