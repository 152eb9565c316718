//! Window store backed by a shared SQLite file.
//!
//! Every process opening the same file shares the counters. The check and
//! the increment run inside one `BEGIN IMMEDIATE` transaction, so SQLite's
//! write lock serializes admissions across connections.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ModqueueError, Result};
use crate::ratelimit::window::{COUNTER_TTL_MS, WindowStore, admits, window_second};

/// Counters in a SQLite table.
#[derive(Clone)]
pub struct SqliteWindowStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWindowStore").finish_non_exhaustive()
    }
}

impl SqliteWindowStore {
    /// Open or create the counter table in the given database file.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_counters (
                key TEXT NOT NULL,
                second INTEGER NOT NULL,
                count INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (key, second)
            );
            CREATE INDEX IF NOT EXISTS idx_rate_limit_expiry ON rate_limit_counters(expires_at);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Synchronous check-and-increment.
    pub fn admit_blocking(&self, key: &str, limit: u32, now_ms: i64) -> Result<bool> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ModqueueError::RateLimitStore(e.to_string()))?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM rate_limit_counters WHERE expires_at <= ?1", [now_ms])?;

        let second = window_second(now_ms);
        let count_at = |second: i64| -> rusqlite::Result<i64> {
            tx.query_row(
                "SELECT count FROM rate_limit_counters WHERE key = ?1 AND second = ?2",
                params![key, second],
                |row| row.get(0),
            )
            .optional()
            .map(|count| count.unwrap_or(0))
        };
        let current = count_at(second)?;
        let previous = count_at(second - 1)?;

        let admitted = admits(previous, current, limit, now_ms);
        if admitted {
            tx.execute(
                "INSERT INTO rate_limit_counters (key, second, count, expires_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT (key, second) DO UPDATE SET
                     count = count + 1,
                     expires_at = excluded.expires_at",
                params![key, second, now_ms + COUNTER_TTL_MS],
            )?;
        }
        tx.commit()?;
        Ok(admitted)
    }
}

#[async_trait]
impl WindowStore for SqliteWindowStore {
    async fn admit(&self, key: &str, limit: u32, now_ms: i64) -> Result<bool> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.admit_blocking(&key, limit, now_ms))
            .await
            .map_err(|e| ModqueueError::RateLimitStore(e.to_string()))?
    }
}
