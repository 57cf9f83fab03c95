//! Redis-compatible counter store (Redis, Dragonfly, Valkey).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{ErrorKind, RedisError, Script};
use tracing::{debug, warn};

use super::{CounterStore, StoreError, WindowCount};

/// Increment-and-expire as one server-side step.
///
/// Expiry is set on the first increment of a window, and re-armed if the key
/// somehow lost its TTL so a counter can never become immortal.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Floor for the connect deadline; a TCP handshake needs more slack than a reply.
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Reconnect attempts before a connection is reported as failed.
const CONNECT_RETRIES: usize = 2;

/// Counter store backed by a Redis-compatible server shared by every
/// process enforcing the same quotas.
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to the server at `url` and verify it answers `PING`.
    ///
    /// Every command is bounded by `timeout`, so a call abandoned by the
    /// limiter can't stay parked on a silent server.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "Invalid Redis URL for counter store");
            StoreError::Unavailable(format!("failed to create Redis client: {}", e))
        })?;

        let config = ConnectionManagerConfig::new()
            .set_response_timeout(timeout)
            .set_connection_timeout(timeout.max(MIN_CONNECT_TIMEOUT))
            .set_number_of_retries(CONNECT_RETRIES);

        let connection_manager = ConnectionManager::new_with_config(client, config).await.map_err(|e| {
            warn!(error = %e, "Failed to connect to counter store");
            classify(e)
        })?;

        let store = Self {
            connection_manager,
            script: Script::new(INCREMENT_SCRIPT),
        };
        store.ping().await?;

        debug!("Connected to Redis counter store");
        Ok(store)
    }

    /// Round-trip a `PING` to the server.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply: {}", reply)))
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection_manager.clone();
        let window_ms = window.as_millis().max(1) as u64;

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        window_count_from_reply(count, ttl_ms)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Turn the script's `{count, pttl}` reply into a [`WindowCount`].
fn window_count_from_reply(count: i64, ttl_ms: i64) -> Result<WindowCount, StoreError> {
    if count < 1 {
        return Err(StoreError::Protocol(format!("counter returned {}", count)));
    }

    Ok(WindowCount {
        count: count as u64,
        ttl_remaining: Duration::from_millis(ttl_ms.max(0) as u64),
    })
}

/// Map a Redis error onto the store taxonomy.
fn classify(error: RedisError) -> StoreError {
    match error.kind() {
        ErrorKind::TypeError | ErrorKind::ResponseError => StoreError::Protocol(error.to_string()),
        _ => StoreError::Unavailable(error.to_string()),
    }
}
