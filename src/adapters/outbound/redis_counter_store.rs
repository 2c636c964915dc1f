//! Redis Counter Store
//!
//! Implements CounterStore on Redis so replicas share rate-limit windows.

use crate::domain::entities::WindowState;
use crate::domain::errors::GatewayError;
use crate::domain::ports::CounterStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client as RedisClient, Script};

/// Same semantics as `RateLimitWindow::admit`, executed atomically
/// server-side. Keys carry a TTL of the remaining window so elapsed
/// windows disappear on their own.
const ACQUIRE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

local start = tonumber(redis.call('HGET', KEYS[1], 'start'))
local count = tonumber(redis.call('HGET', KEYS[1], 'count'))

if start == nil or count == nil or now - start >= window then
  start = now
  count = 0
end

local admitted = 0
if count < limit then
  count = count + 1
  admitted = 1
end

redis.call('HSET', KEYS[1], 'start', start, 'count', count)
redis.call('PEXPIRE', KEYS[1], math.max(1, window - (now - start)))
return {count, start, admitted}
"#;

/// Redis-backed window store for horizontally scaled deployments.
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    script: Script,
    prefix: String,
}

impl RedisCounterStore {
    /// Connect to `redis_url` and prepare the admission script.
    pub async fn connect(redis_url: &str) -> Result<Self, GatewayError> {
        let client = RedisClient::open(redis_url).map_err(store_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;
        tracing::info!("rate limit counters stored in redis");
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            script: Script::new(ACQUIRE_SCRIPT),
            prefix: "ocr-gateway:".to_string(),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn store_error(e: redis::RedisError) -> GatewayError {
    GatewayError::CounterStore(e.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<WindowState, GatewayError> {
        let mut conn = self.conn.clone();
        let (count, window_start_ms, admitted): (u32, u64, i64) = self
            .script
            .key(self.redis_key(key))
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(WindowState {
            count,
            window_start_ms,
            admitted: admitted == 1,
        })
    }

    async fn purge_expired(&self, _now_ms: u64) -> Result<usize, GatewayError> {
        // Redis expires windows through key TTLs.
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
