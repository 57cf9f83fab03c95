//! Per-request admission decisions.

use std::time::Duration;

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Within quota
    Allowed,
    /// Over quota
    Denied,
    /// Store unavailable, tier fails open
    FailOpen,
    /// Store unavailable, tier fails closed
    FailClosed,
}

impl Outcome {
    /// Label value used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Denied => "denied",
            Outcome::FailOpen => "fail_open",
            Outcome::FailClosed => "fail_closed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of checking one request against its tier's quota.
///
/// Computed fresh for every request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The tier's `max_requests`
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// How long a denied caller should wait before retrying
    pub retry_after: Option<Duration>,
    /// Time until the current window resets
    pub reset_after: Duration,
    /// How the decision was reached
    pub outcome: Outcome,
}

impl Decision {
    /// A request within quota.
    pub fn allowed(limit: u64, remaining: u64, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: None,
            reset_after,
            outcome: Outcome::Allowed,
        }
    }

    /// A request over quota. `retry_after` is never zero.
    pub fn denied(limit: u64, retry_after: Duration) -> Self {
        let retry_after = retry_after.max(Duration::from_millis(1));
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after: Some(retry_after),
            reset_after: retry_after,
            outcome: Outcome::Denied,
        }
    }

    /// Allowed without consulting the store.
    pub fn fail_open(limit: u64, window: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            retry_after: None,
            reset_after: window,
            outcome: Outcome::FailOpen,
        }
    }

    /// Denied without consulting the store.
    pub fn fail_closed(limit: u64, retry_after: Duration) -> Self {
        Self {
            outcome: Outcome::FailClosed,
            ..Self::denied(limit, retry_after)
        }
    }

    /// Whether the decision was made under a failure mode.
    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, Outcome::FailOpen | Outcome::FailClosed)
    }

    /// `retry_after` in milliseconds, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after.map(|d| d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_decision() {
        let decision = Decision::allowed(100, 42, Duration::from_secs(30));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 42);
        assert!(decision.retry_after.is_none());
        assert!(!decision.is_degraded());
    }

    #[test]
    fn test_denied_decision_never_zero_retry() {
        let decision = Decision::denied(5, Duration::ZERO);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_ms(), Some(1));
    }

    #[test]
    fn test_degraded_decisions() {
        let open = Decision::fail_open(10, Duration::from_secs(60));
        assert!(open.allowed);
        assert!(open.is_degraded());
        assert_eq!(open.outcome.as_str(), "fail_open");

        let closed = Decision::fail_closed(10, Duration::from_secs(1));
        assert!(!closed.allowed);
        assert!(closed.is_degraded());
        assert_eq!(closed.outcome, Outcome::FailClosed);
        assert_eq!(closed.retry_after, Some(Duration::from_secs(1)));
    }
}
