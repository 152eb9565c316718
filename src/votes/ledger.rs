//! Vote ledger: per-voter votes on subjects and their verification.
//!
//! The ledger is the only writer of `is_verified` / `is_correct`. A vote is
//! created unverified and becomes verified exactly once, when the subject's
//! review outcome is decided. Verified votes are frozen.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ModqueueError, Result};
use crate::id::now_ms;
use crate::store::{SubjectKind, SubjectStore, locate};

/// A single voter's opinion on a subject.
///
/// An upvote vouches that the subject is appropriate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vote {
    pub kind: SubjectKind,
    pub subject_id: i64,
    pub voter_id: i64,
    pub is_upvote: bool,
    pub is_verified: bool,
    pub is_correct: bool,
    /// Unix timestamp in milliseconds
    pub voted_at: i64,
}

/// Records votes and verifies them against review outcomes.
pub struct VoteLedger {
    store: Arc<SubjectStore>,
}

impl VoteLedger {
    /// Create a ledger over the given store.
    pub fn new(store: Arc<SubjectStore>) -> Self {
        Self { store }
    }

    /// Record or replace a voter's vote on a subject.
    ///
    /// The subject's upvote/downvote counters are recomputed in the same
    /// transaction. Returns false when the existing vote is already verified
    /// and therefore left unchanged.
    pub fn record_vote(&self, kind: SubjectKind, subject_id: i64, voter_id: i64, is_upvote: bool) -> Result<bool> {
        let now = now_ms();
        self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let status = locate(&tx, kind, subject_id)?.ok_or(ModqueueError::SubjectNotFound(kind, subject_id))?;

            let changed = tx.execute(
                "INSERT INTO votes (kind, subject_id, voter_id, is_upvote, is_verified, is_correct, voted_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)
                 ON CONFLICT (kind, subject_id, voter_id) DO UPDATE SET
                     is_upvote = excluded.is_upvote,
                     voted_at = excluded.voted_at
                 WHERE votes.is_verified = 0",
                params![kind.as_str(), subject_id, voter_id, is_upvote, now],
            )?;

            if changed == 1 {
                recompute_reputation(&tx, kind, status.table(kind), subject_id)?;
            }
            tx.commit()?;

            log::debug!(
                "Vote by {} on {} {}: {} ({})",
                voter_id,
                kind,
                subject_id,
                if is_upvote { "up" } else { "down" },
                if changed == 1 { "recorded" } else { "frozen" }
            );
            Ok(changed == 1)
        })
    }

    /// Verify every outstanding vote on a subject against its outcome.
    ///
    /// Appends one statistics row per newly verified vote. Votes verified by an
    /// earlier call are untouched. Returns the number of votes verified.
    pub fn verify_votes(&self, kind: SubjectKind, subject_id: i64, was_inappropriate: bool) -> Result<usize> {
        let now = now_ms();
        self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

            tx.execute(
                "INSERT OR IGNORE INTO vote_stats (kind, subject_id, voter_id, is_correct, voted_at, verified_at)
                 SELECT kind, subject_id, voter_id, (is_upvote != ?3), voted_at, ?4
                 FROM votes
                 WHERE kind = ?1 AND subject_id = ?2 AND is_verified = 0",
                params![kind.as_str(), subject_id, was_inappropriate, now],
            )?;
            let verified = tx.execute(
                "UPDATE votes SET is_correct = (is_upvote != ?3), is_verified = 1
                 WHERE kind = ?1 AND subject_id = ?2 AND is_verified = 0",
                params![kind.as_str(), subject_id, was_inappropriate],
            )?;
            tx.commit()?;

            if verified > 0 {
                log::info!(
                    "Verified {} votes on {} {} (inappropriate: {})",
                    verified,
                    kind,
                    subject_id,
                    was_inappropriate
                );
            }
            Ok(verified)
        })
    }

    /// Get one voter's vote on a subject.
    pub fn get_vote(&self, kind: SubjectKind, subject_id: i64, voter_id: i64) -> Result<Option<Vote>> {
        self.store.with_conn(|conn| {
            let vote = conn
                .query_row(
                    "SELECT kind, subject_id, voter_id, is_upvote, is_verified, is_correct, voted_at
                     FROM votes WHERE kind = ?1 AND subject_id = ?2 AND voter_id = ?3",
                    params![kind.as_str(), subject_id, voter_id],
                    row_to_vote,
                )
                .optional()?;
            Ok(vote)
        })
    }

    /// All votes on a subject, oldest first.
    pub fn votes_for(&self, kind: SubjectKind, subject_id: i64) -> Result<Vec<Vote>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, subject_id, voter_id, is_upvote, is_verified, is_correct, voted_at
                 FROM votes WHERE kind = ?1 AND subject_id = ?2
                 ORDER BY voted_at, voter_id",
            )?;
            let rows = stmt.query_map(params![kind.as_str(), subject_id], row_to_vote)?;

            let mut votes = Vec::new();
            for row in rows {
                votes.push(row?);
            }
            Ok(votes)
        })
    }
}

/// Recount a subject's votes into its partition row.
fn recompute_reputation(conn: &Connection, kind: SubjectKind, table: &str, subject_id: i64) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {table} SET
                 upvotes = (SELECT COUNT(*) FROM votes WHERE kind = ?1 AND subject_id = ?2 AND is_upvote = 1),
                 downvotes = (SELECT COUNT(*) FROM votes WHERE kind = ?1 AND subject_id = ?2 AND is_upvote = 0)
             WHERE id = ?2"
        ),
        params![kind.as_str(), subject_id],
    )?;
    Ok(())
}

fn row_to_vote(row: &Row<'_>) -> rusqlite::Result<Vote> {
    let kind: String = row.get(0)?;
    let kind = SubjectKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown subject kind '{}'", kind).into(),
        )
    })?;

    Ok(Vote {
        kind,
        subject_id: row.get(1)?,
        voter_id: row.get(2)?,
        is_upvote: row.get(3)?,
        is_verified: row.get(4)?,
        is_correct: row.get(5)?,
        voted_at: row.get(6)?,
    })
}
