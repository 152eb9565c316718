//! Sliding-window arithmetic shared by every window store.
//!
//! Each key keeps one counter per wall-clock second. A request at `now` is
//! admitted when the previous second's count, weighted by how much of it
//! still overlaps the trailing one-second window, plus the current second's
//! count stays below the limit.

use async_trait::async_trait;

use crate::error::Result;

/// Width of one counter bucket.
pub const WINDOW_MS: i64 = 1000;
/// Counters outlive their bucket by one more window so the next second can
/// still weight them.
pub const COUNTER_TTL_MS: i64 = 2 * WINDOW_MS;

/// Bucket index of a timestamp.
pub fn window_second(now_ms: i64) -> i64 {
    now_ms.div_euclid(WINDOW_MS)
}

/// Fraction of the previous bucket still inside the trailing window.
pub fn previous_weight(now_ms: i64) -> f64 {
    1.0 - now_ms.rem_euclid(WINDOW_MS) as f64 / WINDOW_MS as f64
}

/// Whether one more request fits under `limit`.
pub fn admits(previous: i64, current: i64, limit: u32, now_ms: i64) -> bool {
    previous as f64 * previous_weight(now_ms) + (current as f64) < limit as f64
}

/// Storage key for one bucket of a limiter key.
///
/// The key part is a Redis Cluster hash tag, so every bucket of one key lands
/// in the same slot.
pub fn counter_key(key: &str, second: i64) -> String {
    format!("ratelimit:{{{key}}}:{second}")
}

/// Shared counter storage. `admit` must check and increment atomically with
/// respect to every other process using the same backend.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Record one request under `key` if it fits, returning whether it did.
    async fn admit(&self, key: &str, limit: u32, now_ms: i64) -> Result<bool>;
}
