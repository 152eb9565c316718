//! Window store backed by Redis.
//!
//! The check-and-increment runs as one Lua script through `EVAL`, which
//! Redis executes atomically.

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::{Config, Pool, Runtime};

use crate::error::{ModqueueError, Result};
use crate::ratelimit::window::{COUNTER_TTL_MS, WINDOW_MS, WindowStore, counter_key, window_second};

/// KEYS[1] = current bucket, KEYS[2] = previous bucket.
/// ARGV[1] = limit, ARGV[2] = now in ms, ARGV[3] = window ms, ARGV[4] = ttl ms.
const SLIDING_WINDOW_LUA: &str = r#"
local limit = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local previous = tonumber(redis.call('GET', KEYS[2]) or '0')
local weight = 1 - (now % window) / window

if previous * weight + current < limit then
    redis.call('INCR', KEYS[1])
    redis.call('PEXPIRE', KEYS[1], ttl)
    return 1
end
return 0
"#;

/// Counters in Redis, shared by every process pointed at the same server.
pub struct RedisWindowStore {
    pool: Pool,
}

impl RedisWindowStore {
    /// Build a connection pool for the given `redis://` URL.
    ///
    /// No connection is made until the first admission.
    pub fn connect(url: &str) -> Result<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ModqueueError::RateLimitStore(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn admit(&self, key: &str, limit: u32, now_ms: i64) -> Result<bool> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ModqueueError::RateLimitStore(e.to_string()))?;

        let second = window_second(now_ms);
        let admitted: i64 = cmd("EVAL")
            .arg(SLIDING_WINDOW_LUA)
            .arg(2)
            .arg(counter_key(key, second))
            .arg(counter_key(key, second - 1))
            .arg(limit)
            .arg(now_ms)
            .arg(WINDOW_MS)
            .arg(COUNTER_TTL_MS)
            .query_async(&mut conn)
            .await
            .map_err(|e| ModqueueError::RateLimitStore(e.to_string()))?;
        Ok(admitted == 1)
    }
}
