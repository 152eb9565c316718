//! RateLimiter: shared ceiling on calls to an external service.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ModqueueError, Result};
use crate::id::now_ms;
use crate::ratelimit::window::WindowStore;

/// Default pause between admission attempts in `acquire`.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A per-second ceiling enforced through a shared window store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    limit: u32,
    retry_interval: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Allow at most `limit` calls per key in any trailing second.
    pub fn new(store: Arc<dyn WindowStore>, limit: u32) -> Self {
        Self {
            store,
            limit,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Take a slot if one is free right now.
    ///
    /// A store failure denies the call.
    pub async fn try_acquire(&self, key: &str) -> bool {
        match self.store.admit(key, self.limit, now_ms()).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::trace!(key, limit = self.limit, "Rate limit reached");
                false
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Rate limit store unavailable, denying call");
                false
            }
        }
    }

    /// Wait for a slot, retrying on a fixed interval until admitted or
    /// cancelled.
    pub async fn acquire(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(ModqueueError::Cancelled(format!("rate limit slot for {key}")));
            }
            if self.try_acquire(key).await {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ModqueueError::Cancelled(format!("rate limit slot for {key}")));
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}
