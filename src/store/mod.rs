//! Shared counter storage.
//!
//! The counter store is the only component that talks to storage shared
//! between server processes. Quota correctness depends entirely on the
//! atomicity of [`CounterStore::increment`].

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

/// Errors returned by counter store backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached in time (connection refused, I/O, timeout).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we could not interpret.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// Post-increment state of one counter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Number of increments applied in the current window, including this one.
    pub count: u64,
    /// Time left until the store expires the window.
    pub ttl_remaining: Duration,
}

/// A shared counter with atomic increment-and-expire semantics.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`.
    ///
    /// An absent (or expired) counter is initialised to 1 with an expiry of
    /// `window`. Returns the post-increment count and the time remaining until
    /// the window expires.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}
