//! Distributed sliding-window rate limiter.
//!
//! Many workers share one per-second ceiling on calls to the external
//! platform. The counters live in a `WindowStore`:
//! - **RedisWindowStore**: Lua script over a pooled Redis connection
//! - **SqliteWindowStore**: one immediate transaction on a shared file
//! - **MemoryWindowStore**: single process only
//!
//! # Example
//!
//! ```ignore
//! use modqueue::ratelimit::{RateLimiter, RedisWindowStore};
//!
//! let store = Arc::new(RedisWindowStore::connect("redis://127.0.0.1:6379")?);
//! let limiter = RateLimiter::new(store, 10);
//! limiter.acquire("platform", &shutdown).await?;
//! ```

mod limiter;
mod memory;
mod redis;
mod sqlite;
mod window;

pub use limiter::{DEFAULT_RETRY_INTERVAL, RateLimiter};
pub use memory::MemoryWindowStore;
pub use redis::RedisWindowStore;
pub use sqlite::SqliteWindowStore;
pub use window::{COUNTER_TTL_MS, WINDOW_MS, WindowStore, admits, counter_key, previous_weight, window_second};
