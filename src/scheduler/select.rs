//! Scheduler for claiming the next subject to work on.
//!
//! A claim is one write transaction that picks the best eligible row and stamps
//! its staleness column before returning it. The stamp is the claim: once
//! written, the row stops being eligible for every other claimant until the
//! purpose's staleness window elapses, so a crashed claimer holds a row for at
//! most one window. Claimers never block on a held row, they simply never see
//! it.

use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ModqueueError, Result};
use crate::id::now_ms;
use crate::scheduler::priority::{ClaimPurpose, SortStrategy, StalenessConfig};
use crate::store::{SUBJECT_COLUMNS, Subject, SubjectKind, SubjectStore, row_to_subject};

/// How many recent subjects a reviewer is not handed again.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Parameters of a single claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub purpose: ClaimPurpose,
    pub sort: SortStrategy,
    /// IDs the caller has recently handled
    pub exclude: HashSet<i64>,
    /// When set, the reviewer's stored history is excluded and the claim is
    /// appended to it.
    pub reviewer: Option<i64>,
    pub deadline: Option<Instant>,
}

impl ClaimRequest {
    /// Create a request with random sorting and no exclusions.
    pub fn new(purpose: ClaimPurpose) -> Self {
        Self {
            purpose,
            sort: SortStrategy::Random,
            exclude: HashSet::new(),
            reviewer: None,
            deadline: None,
        }
    }

    /// Set the sort strategy.
    pub fn with_sort(mut self, sort: SortStrategy) -> Self {
        self.sort = sort;
        self
    }

    /// Exclude the given IDs.
    pub fn excluding(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.exclude.extend(ids);
        self
    }

    /// Track this claim in a reviewer's history.
    pub fn for_reviewer(mut self, reviewer_id: i64) -> Self {
        self.reviewer = Some(reviewer_id);
        self
    }

    /// Refuse to start after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Claims subjects out of the partitioned store.
pub struct Scheduler {
    store: Arc<SubjectStore>,
    staleness: StalenessConfig,
    history_size: usize,
}

impl Scheduler {
    /// Create a Scheduler with default staleness windows.
    pub fn new(store: Arc<SubjectStore>) -> Self {
        Self {
            store,
            staleness: StalenessConfig::default(),
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }

    /// Use custom staleness windows.
    pub fn with_staleness(mut self, staleness: StalenessConfig) -> Self {
        self.staleness = staleness;
        self
    }

    /// Use a custom reviewer history length.
    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    /// Claim the next subject for `request.purpose`.
    ///
    /// Partitions are tried in the purpose's fallback order and the first one
    /// with an eligible row wins. `Ok(None)` means there is nothing to do.
    pub fn claim_next(&self, request: &ClaimRequest) -> Result<Option<Subject>> {
        if let Some(deadline) = request.deadline
            && Instant::now() >= deadline
        {
            return Err(ModqueueError::DeadlineExceeded("claim"));
        }

        let purpose = request.purpose;
        let kind = purpose.kind();
        let column = purpose.stamp_column();
        let now = now_ms();
        let threshold = now - self.staleness.window(&purpose).as_millis() as i64;

        self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

            let mut exclude: Vec<i64> = request.exclude.iter().copied().collect();
            if let Some(reviewer) = request.reviewer {
                exclude.extend(recent_reviews(&tx, reviewer, kind, self.history_size)?);
            }
            let exclude_json = serde_json::to_string(&exclude)?;

            for status in purpose.partitions() {
                let table = status.table(kind);
                let sql = format!(
                    "UPDATE {table} SET {column} = ?1
                     WHERE id = (
                         SELECT id FROM {table}
                         WHERE COALESCE({column}, 0) < ?2
                           AND id NOT IN (SELECT value FROM json_each(?3))
                         ORDER BY {order}
                         LIMIT 1
                     )
                     RETURNING {SUBJECT_COLUMNS}",
                    order = request.sort.order_by(),
                );

                let claimed = tx
                    .query_row(&sql, params![now, threshold, exclude_json], row_to_subject)
                    .optional()?;

                if let Some(subject) = claimed {
                    if let Some(reviewer) = request.reviewer {
                        record_review(&tx, reviewer, kind, subject.id, now, self.history_size)?;
                    }
                    tx.commit()?;
                    log::debug!(
                        "Claimed {} {} from {} for {}",
                        kind,
                        subject.id,
                        status,
                        purpose.label()
                    );
                    return Ok(Some(subject));
                }
            }

            log::debug!("No eligible {} subjects for {}", kind, purpose.label());
            Ok(None)
        })
    }

    /// Claim up to `limit` subjects in one transaction.
    ///
    /// Rows are taken least-recently-stamped first, filling from partitions
    /// in fallback order. Used by fleet-wide background jobs.
    pub fn claim_batch(&self, purpose: ClaimPurpose, limit: usize) -> Result<Vec<i64>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let kind = purpose.kind();
        let column = purpose.stamp_column();
        let now = now_ms();
        let threshold = now - self.staleness.window(&purpose).as_millis() as i64;

        self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let mut claimed: Vec<i64> = Vec::new();

            for status in purpose.partitions() {
                let remaining = limit - claimed.len();
                if remaining == 0 {
                    break;
                }

                let table = status.table(kind);
                let mut stmt = tx.prepare(&format!(
                    "UPDATE {table} SET {column} = ?1
                     WHERE id IN (
                         SELECT id FROM {table}
                         WHERE COALESCE({column}, 0) < ?2
                         ORDER BY COALESCE({column}, 0) ASC, id ASC
                         LIMIT ?3
                     )
                     RETURNING id"
                ))?;
                let remaining = i64::try_from(remaining).unwrap_or(i64::MAX);
                let ids = stmt.query_map(params![now, threshold, remaining], |row| row.get::<_, i64>(0))?;
                for id in ids {
                    claimed.push(id?);
                }
            }

            tx.commit()?;
            log::debug!("Batch-claimed {} {} subjects for {}", claimed.len(), kind, purpose.label());
            Ok(claimed)
        })
    }

    /// A reviewer's most recently claimed subject IDs, newest first.
    pub fn recent_reviews(&self, reviewer_id: i64, kind: SubjectKind) -> Result<Vec<i64>> {
        self.store
            .with_conn(|conn| recent_reviews(conn, reviewer_id, kind, self.history_size))
    }
}

fn recent_reviews(conn: &Connection, reviewer_id: i64, kind: SubjectKind, limit: usize) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT subject_id FROM review_history
         WHERE reviewer_id = ?1 AND kind = ?2
         ORDER BY reviewed_at DESC, rowid DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![reviewer_id, kind.as_str(), limit as i64], |row| row.get(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

fn record_review(
    conn: &Connection,
    reviewer_id: i64,
    kind: SubjectKind,
    subject_id: i64,
    now: i64,
    keep: usize,
) -> Result<()> {
    conn.execute(
        "INSERT INTO review_history (reviewer_id, kind, subject_id, reviewed_at) VALUES (?1, ?2, ?3, ?4)",
        params![reviewer_id, kind.as_str(), subject_id, now],
    )?;
    conn.execute(
        "DELETE FROM review_history
         WHERE reviewer_id = ?1 AND kind = ?2 AND rowid NOT IN (
             SELECT rowid FROM review_history
             WHERE reviewer_id = ?1 AND kind = ?2
             ORDER BY reviewed_at DESC, rowid DESC
             LIMIT ?3
         )",
        params![reviewer_id, kind.as_str(), keep as i64],
    )?;
    Ok(())
}
