//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, StoreError, WindowCount};

/// One fixed window for one key.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    window_start: Instant,
    expires_at: Instant,
}

impl CounterEntry {
    fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            expires_at: now + window,
        }
    }
}

/// Counter store held in process memory.
///
/// Increments are atomic within one process (the map shard stays locked for
/// the whole read-modify-write), which makes this backend correct for
/// single-instance deployments and tests. It gives no guarantees across
/// processes; use [`super::RedisCounterStore`] for that.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every window that has already expired.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.counters.retain(|_, entry| {
            let live = entry.expires_at > now;
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }

    /// Periodically purge expired windows so idle keys don't accumulate.
    pub fn start_purge_task(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = self.counters.len(), "Purged expired counter windows");
                }
            }
        })
    }

    /// Number of windows currently held, expired or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no windows at all.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Start of the live window for `key`, if any.
    pub fn window_start(&self, key: &str) -> Option<Instant> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.window_start)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry::open(now, window));

        if entry.expires_at <= now {
            *entry = CounterEntry::open(now, window);
        }
        entry.count += 1;

        let result = WindowCount {
            count: entry.count,
            ttl_remaining: entry.expires_at.saturating_duration_since(now),
        };

        trace!(key, count = result.count, ttl_ms = result.ttl_remaining.as_millis() as u64, "Incremented counter");
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
