//! Leaderboard: per-period voter rankings with lease-guarded refresh.
//!
//! Aggregates are materialized per period in the `leaderboard` table and
//! rebuilt from verified vote statistics once they go stale. At most one
//! caller rebuilds a period at a time; everyone else keeps reading the
//! previous materialization.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::id::now_ms;
use crate::store::SubjectStore;

/// Default time a refresher holds the rebuild lease.
pub const DEFAULT_REFRESH_LEASE: Duration = Duration::from_secs(30);

/// Aggregation window for a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    Daily,
    Weekly,
    BiWeekly,
    Monthly,
    BiAnnually,
    Annually,
    AllTime,
}

impl LeaderboardPeriod {
    pub const ALL: [LeaderboardPeriod; 7] = [
        LeaderboardPeriod::Daily,
        LeaderboardPeriod::Weekly,
        LeaderboardPeriod::BiWeekly,
        LeaderboardPeriod::Monthly,
        LeaderboardPeriod::BiAnnually,
        LeaderboardPeriod::Annually,
        LeaderboardPeriod::AllTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderboardPeriod::Daily => "daily",
            LeaderboardPeriod::Weekly => "weekly",
            LeaderboardPeriod::BiWeekly => "biweekly",
            LeaderboardPeriod::Monthly => "monthly",
            LeaderboardPeriod::BiAnnually => "biannually",
            LeaderboardPeriod::Annually => "annually",
            LeaderboardPeriod::AllTime => "all_time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(LeaderboardPeriod::Daily),
            "weekly" => Some(LeaderboardPeriod::Weekly),
            "biweekly" | "bi_weekly" => Some(LeaderboardPeriod::BiWeekly),
            "monthly" => Some(LeaderboardPeriod::Monthly),
            "biannually" | "bi_annually" => Some(LeaderboardPeriod::BiAnnually),
            "annually" => Some(LeaderboardPeriod::Annually),
            "all_time" | "alltime" | "all-time" => Some(LeaderboardPeriod::AllTime),
            _ => None,
        }
    }

    /// Rolling window of votes counted, `None` for all time.
    pub fn window(&self) -> Option<Duration> {
        const DAY: u64 = 24 * 60 * 60;
        let days = match self {
            LeaderboardPeriod::Daily => 1,
            LeaderboardPeriod::Weekly => 7,
            LeaderboardPeriod::BiWeekly => 14,
            LeaderboardPeriod::Monthly => 30,
            LeaderboardPeriod::BiAnnually => 182,
            LeaderboardPeriod::Annually => 365,
            LeaderboardPeriod::AllTime => return None,
        };
        Some(Duration::from_secs(days * DAY))
    }

    /// How long a materialization is served before it is rebuilt.
    pub fn staleness(&self) -> Duration {
        let minutes = match self {
            LeaderboardPeriod::Daily => 5,
            LeaderboardPeriod::Weekly => 15,
            LeaderboardPeriod::BiWeekly => 30,
            LeaderboardPeriod::Monthly => 60,
            LeaderboardPeriod::BiAnnually => 6 * 60,
            LeaderboardPeriod::Annually => 12 * 60,
            LeaderboardPeriod::AllTime => 24 * 60,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl std::fmt::Display for LeaderboardPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One voter's aggregate for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub voter_id: i64,
    pub correct_votes: i64,
    pub total_votes: i64,
    /// correct / total, in [0, 1]
    pub accuracy: f64,
    pub last_voted_at: i64,
}

/// Opaque keyset position: the sort key of the last entry on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardCursor {
    correct_votes: i64,
    accuracy: f64,
    last_voted_at: i64,
    voter_id: i64,
}

impl LeaderboardCursor {
    fn after(entry: &LeaderboardEntry) -> Self {
        Self {
            correct_votes: entry.correct_votes,
            accuracy: entry.accuracy,
            last_voted_at: entry.last_voted_at,
            voter_id: entry.voter_id,
        }
    }

    /// Serialize for handing to a client.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a cursor previously produced by `encode`.
    pub fn decode(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// A page of leaderboard entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    /// Present when more entries follow
    pub next_cursor: Option<LeaderboardCursor>,
}

/// A voter's standing in one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterStats {
    pub entry: LeaderboardEntry,
    /// 1-based position in the leaderboard
    pub rank: i64,
}

/// Reads and refreshes materialized leaderboards.
pub struct Leaderboard {
    store: Arc<SubjectStore>,
    lease: Duration,
    staleness: HashMap<LeaderboardPeriod, Duration>,
}

impl Leaderboard {
    /// Create a leaderboard reader with default staleness per period.
    pub fn new(store: Arc<SubjectStore>) -> Self {
        Self {
            store,
            lease: DEFAULT_REFRESH_LEASE,
            staleness: HashMap::new(),
        }
    }

    /// Override how long one period's materialization is served.
    pub fn with_staleness(mut self, period: LeaderboardPeriod, staleness: Duration) -> Self {
        self.staleness.insert(period, staleness);
        self
    }

    /// Override how long a refresher holds the rebuild lease.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn staleness_of(&self, period: LeaderboardPeriod) -> Duration {
        self.staleness
            .get(&period)
            .copied()
            .unwrap_or_else(|| period.staleness())
    }

    /// Rebuild a period if its materialization is stale and nobody else is
    /// rebuilding it. Returns whether this call performed the rebuild.
    pub fn refresh_if_stale(&self, period: LeaderboardPeriod) -> Result<bool> {
        let now = now_ms();
        let staleness = self.staleness_of(period).as_millis() as i64;
        let lease = self.lease.as_millis() as i64;

        self.store.with_conn(|conn| {
            // Cheap read first, so fresh or leased periods never touch the write lock
            let state: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT refreshed_at, lease_until FROM leaderboard_refresh WHERE period = ?1",
                    [period.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((refreshed_at, lease_until)) = state
                && (refreshed_at > now - staleness || lease_until > now)
            {
                return Ok(false);
            }

            conn.execute(
                "INSERT OR IGNORE INTO leaderboard_refresh (period) VALUES (?1)",
                [period.as_str()],
            )?;
            let acquired = conn.execute(
                "UPDATE leaderboard_refresh SET lease_until = ?2
                 WHERE period = ?1 AND refreshed_at <= ?3 AND lease_until <= ?4",
                params![period.as_str(), now + lease, now - staleness, now],
            )? == 1;
            if !acquired {
                log::debug!("Leaderboard {} refresh already in progress", period);
                return Ok(false);
            }

            if let Err(e) = rebuild(conn, period, now) {
                log::warn!("Leaderboard {} refresh failed: {}", period, e);
                conn.execute(
                    "UPDATE leaderboard_refresh SET lease_until = 0 WHERE period = ?1",
                    [period.as_str()],
                )?;
                return Err(e);
            }
            log::info!("Refreshed {} leaderboard", period);
            Ok(true)
        })
    }

    /// One page of a period's leaderboard, best first.
    ///
    /// Ordered by correct votes, then accuracy, then most recent vote, then
    /// voter id, all descending. Pass the previous page's `next_cursor` to
    /// continue.
    pub fn page(
        &self,
        period: LeaderboardPeriod,
        cursor: Option<&LeaderboardCursor>,
        limit: usize,
    ) -> Result<LeaderboardPage> {
        self.refresh_if_stale(period)?;
        if limit == 0 {
            return Ok(LeaderboardPage {
                entries: Vec::new(),
                next_cursor: None,
            });
        }

        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT voter_id, correct_votes, total_votes, accuracy, last_voted_at
                 FROM leaderboard
                 WHERE period = ?1
                   AND (?2 IS NULL
                        OR (correct_votes, accuracy, last_voted_at, voter_id) < (?2, ?3, ?4, ?5))
                 ORDER BY correct_votes DESC, accuracy DESC, last_voted_at DESC, voter_id DESC
                 LIMIT ?6",
            )?;
            let rows = stmt.query_map(
                params![
                    period.as_str(),
                    cursor.map(|c| c.correct_votes),
                    cursor.map(|c| c.accuracy),
                    cursor.map(|c| c.last_voted_at),
                    cursor.map(|c| c.voter_id),
                    i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX),
                ],
                row_to_entry,
            )?;

            let mut entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;

            let next_cursor = if entries.len() > limit {
                entries.truncate(limit);
                entries.last().map(LeaderboardCursor::after)
            } else {
                None
            };
            Ok(LeaderboardPage { entries, next_cursor })
        })
    }

    /// A voter's aggregate and rank, `None` if they have no verified votes in
    /// the period.
    pub fn voter_stats(&self, voter_id: i64, period: LeaderboardPeriod) -> Result<Option<VoterStats>> {
        self.refresh_if_stale(period)?;

        self.store.with_conn(|conn| {
            let entry = conn
                .query_row(
                    "SELECT voter_id, correct_votes, total_votes, accuracy, last_voted_at
                     FROM leaderboard WHERE period = ?1 AND voter_id = ?2",
                    params![period.as_str(), voter_id],
                    row_to_entry,
                )
                .optional()?;
            let Some(entry) = entry else {
                return Ok(None);
            };

            let ahead: i64 = conn.query_row(
                "SELECT COUNT(*) FROM leaderboard
                 WHERE period = ?1
                   AND (correct_votes, accuracy, last_voted_at, voter_id) > (?2, ?3, ?4, ?5)",
                params![
                    period.as_str(),
                    entry.correct_votes,
                    entry.accuracy,
                    entry.last_voted_at,
                    entry.voter_id
                ],
                |row| row.get(0),
            )?;
            Ok(Some(VoterStats { entry, rank: ahead + 1 }))
        })
    }
}

/// Replace a period's materialization with fresh aggregates.
fn rebuild(conn: &mut Connection, period: LeaderboardPeriod, now: i64) -> Result<()> {
    let since = match period.window() {
        Some(window) => now - window.as_millis() as i64,
        None => i64::MIN,
    };

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    tx.execute("DELETE FROM leaderboard WHERE period = ?1", [period.as_str()])?;
    tx.execute(
        "INSERT INTO leaderboard (period, voter_id, correct_votes, total_votes, accuracy, last_voted_at)
         SELECT ?1, voter_id, SUM(is_correct), COUNT(*),
                CAST(SUM(is_correct) AS REAL) / COUNT(*), MAX(voted_at)
         FROM vote_stats
         WHERE voted_at >= ?2
         GROUP BY voter_id",
        params![period.as_str(), since],
    )?;
    tx.execute(
        "UPDATE leaderboard_refresh SET refreshed_at = ?2, lease_until = 0 WHERE period = ?1",
        params![period.as_str(), now],
    )?;
    tx.commit()?;
    Ok(())
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LeaderboardEntry> {
    Ok(LeaderboardEntry {
        voter_id: row.get(0)?,
        correct_votes: row.get(1)?,
        total_votes: row.get(2)?,
        accuracy: row.get(3)?,
        last_voted_at: row.get(4)?,
    })
}
