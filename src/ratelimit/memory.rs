//! In-process window store for single-node deployments and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ModqueueError, Result};
use crate::ratelimit::window::{COUNTER_TTL_MS, WindowStore, admits, window_second};

/// Counters held in memory, keyed by (limiter key, bucket).
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    counters: Mutex<HashMap<(String, i64), (i64, i64)>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn admit(&self, key: &str, limit: u32, now_ms: i64) -> Result<bool> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|e| ModqueueError::RateLimitStore(e.to_string()))?;
        counters.retain(|_, (_, expires_at)| *expires_at > now_ms);

        let second = window_second(now_ms);
        let current = counters.get(&(key.to_string(), second)).map_or(0, |(n, _)| *n);
        let previous = counters.get(&(key.to_string(), second - 1)).map_or(0, |(n, _)| *n);
        if !admits(previous, current, limit, now_ms) {
            return Ok(false);
        }

        let entry = counters.entry((key.to_string(), second)).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = now_ms + COUNTER_TTL_MS;
        Ok(true)
    }
}
