//! TransitionEngine: atomic partition moves.
//!
//! A move copies the subject's row into the destination partition and then
//! removes it from every other partition, all in one write transaction. The
//! copy is insert-or-ignore, so a retried or racing move finds the row already
//! in place and turns into a no-op instead of a second set of deletes.

use rusqlite::params;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{ModqueueError, Result};
use crate::id::now_ms;
use crate::store::{SUBJECT_COLUMNS, Subject, SubjectKind, SubjectStatus, SubjectStore, fetch, insert_subject, locate};
use crate::votes::{VerifyRequest, VoteLedger};

/// What happened to the subject's votes after a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Destination does not decide a review outcome
    NotApplicable,
    /// Verified inline; number of votes verified
    Completed(usize),
    /// Handed to the background verifier
    Queued,
    /// Inline verification failed; the move itself stands
    Failed(String),
}

/// Result of a single transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Row moved from `from` to `to`; `removed` rows were deleted from the
    /// other partitions.
    Applied {
        from: SubjectStatus,
        to: SubjectStatus,
        removed: usize,
        verification: Verification,
    },
    /// Subject already in `status`; nothing was written.
    NoOp { status: SubjectStatus },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// Moves subjects between lifecycle partitions.
pub struct TransitionEngine {
    store: Arc<SubjectStore>,
    ledger: Arc<VoteLedger>,
    verify_queue: Option<mpsc::Sender<VerifyRequest>>,
}

impl TransitionEngine {
    /// Create an engine that verifies votes inline.
    pub fn new(store: Arc<SubjectStore>) -> Self {
        let ledger = Arc::new(VoteLedger::new(store.clone()));
        Self {
            store,
            ledger,
            verify_queue: None,
        }
    }

    /// Hand verification to a background verifier instead of running inline.
    ///
    /// When the queue is full or closed the engine falls back to verifying
    /// inline.
    pub fn with_verify_queue(mut self, queue: mpsc::Sender<VerifyRequest>) -> Self {
        self.verify_queue = Some(queue);
        self
    }

    /// The ledger this engine verifies against.
    pub fn ledger(&self) -> Arc<VoteLedger> {
        self.ledger.clone()
    }

    /// Move a subject to `to` from whichever partition currently holds it.
    pub fn transition(&self, kind: SubjectKind, id: i64, to: SubjectStatus) -> Result<TransitionOutcome> {
        self.transition_with_deadline(kind, id, to, None)
    }

    /// Like `transition`, but refuse to start once `deadline` has passed.
    pub fn transition_with_deadline(
        &self,
        kind: SubjectKind,
        id: i64,
        to: SubjectStatus,
        deadline: Option<Instant>,
    ) -> Result<TransitionOutcome> {
        check_deadline(deadline, "transition")?;
        let now = now_ms();

        let moved = self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let from = locate(&tx, kind, id)?.ok_or(ModqueueError::SubjectNotFound(kind, id))?;
            if from == to {
                return Ok(Err(from));
            }
            if !from.can_transition_to(to) {
                return Err(ModqueueError::InvalidTransition { kind, id, from, to });
            }

            let mut subject = fetch(&tx, from.table(kind), id)?.ok_or(ModqueueError::SubjectNotFound(kind, id))?;
            stamp(&mut subject, to, now);
            if !insert_subject(&tx, to.table(kind), &subject)? {
                return Ok(Err(to));
            }

            let mut removed = 0;
            for status in SubjectStatus::ALL.into_iter().filter(|s| *s != to) {
                removed += tx.execute(&format!("DELETE FROM {} WHERE id = ?1", status.table(kind)), [id])?;
            }
            tx.commit()?;
            Ok(Ok((from, removed)))
        })?;

        let (from, removed) = match moved {
            Ok(moved) => moved,
            Err(status) => {
                log::debug!("Transition of {} {} to {} is a no-op", kind, id, to);
                return Ok(TransitionOutcome::NoOp { status });
            }
        };

        log::info!("Moved {} {}: {} -> {}", kind, id, from, to);
        let verification = self.dispatch_verification(kind, id, to);
        Ok(TransitionOutcome::Applied {
            from,
            to,
            removed,
            verification,
        })
    }

    /// Move every listed subject into `to` in one transaction.
    ///
    /// Only rows whose current partition may legally move to `to` are copied;
    /// others are left where they are. Returns the number of subjects moved.
    /// Any failure rolls back the whole batch.
    pub fn bulk_transition(&self, kind: SubjectKind, ids: &[i64], to: SubjectStatus) -> Result<usize> {
        self.bulk_transition_with_deadline(kind, ids, to, None)
    }

    /// Like `bulk_transition`, but refuse to start once `deadline` has passed.
    pub fn bulk_transition_with_deadline(
        &self,
        kind: SubjectKind,
        ids: &[i64],
        to: SubjectStatus,
        deadline: Option<Instant>,
    ) -> Result<usize> {
        check_deadline(deadline, "bulk transition")?;
        if ids.is_empty() {
            return Ok(0);
        }
        let now = now_ms();
        let ids_json = serde_json::to_string(ids)?;

        let columns: Vec<&str> = SUBJECT_COLUMNS.split(',').map(str::trim).collect();
        let stamp_column = to.stamp_column();
        let select_list = columns
            .iter()
            .map(|&column| {
                if column == "last_updated" || Some(column) == stamp_column {
                    "?2"
                } else {
                    column
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut updates = vec![
            "upvotes = excluded.upvotes".to_string(),
            "downvotes = excluded.downvotes".to_string(),
            "last_updated = excluded.last_updated".to_string(),
        ];
        if let Some(column) = stamp_column {
            updates.push(format!("{column} = excluded.{column}"));
        }
        let updates = updates.join(", ");

        let moved = self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let dest = to.table(kind);
            let mut moved = Vec::new();

            for source in SubjectStatus::ALL.into_iter().filter(|s| s.can_transition_to(to)) {
                let table = source.table(kind);
                tx.execute(
                    &format!(
                        "INSERT INTO {dest} ({SUBJECT_COLUMNS})
                         SELECT {select_list} FROM {table}
                         WHERE id IN (SELECT value FROM json_each(?1))
                         ON CONFLICT (id) DO UPDATE SET {updates}"
                    ),
                    params![ids_json, now],
                )?;

                let mut stmt = tx.prepare(&format!(
                    "DELETE FROM {table} WHERE id IN (SELECT value FROM json_each(?1)) RETURNING id"
                ))?;
                let rows = stmt.query_map([&ids_json], |row| row.get::<_, i64>(0))?;
                for row in rows {
                    moved.push(row?);
                }
            }
            tx.commit()?;
            Ok(moved)
        })?;

        log::info!("Bulk moved {} of {} {}s to {}", moved.len(), ids.len(), kind, to);
        for id in &moved {
            self.dispatch_verification(kind, *id, to);
        }
        Ok(moved.len())
    }

    /// Verify votes after a committed move into a deciding state.
    fn dispatch_verification(&self, kind: SubjectKind, id: i64, to: SubjectStatus) -> Verification {
        let Some(was_inappropriate) = to.review_outcome() else {
            return Verification::NotApplicable;
        };

        if let Some(queue) = &self.verify_queue {
            let request = VerifyRequest {
                kind,
                subject_id: id,
                was_inappropriate,
            };
            match queue.try_send(request) {
                Ok(()) => return Verification::Queued,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Verify queue full, verifying {} {} inline", kind, id);
                }
                Err(TrySendError::Closed(_)) => {
                    log::warn!("Verify queue closed, verifying {} {} inline", kind, id);
                }
            }
        }

        match self.ledger.verify_votes(kind, id, was_inappropriate) {
            Ok(verified) => Verification::Completed(verified),
            Err(e) => {
                log::error!("Vote verification for {} {} failed: {}", kind, id, e);
                Verification::Failed(e.to_string())
            }
        }
    }
}

fn check_deadline(deadline: Option<Instant>, operation: &'static str) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(ModqueueError::DeadlineExceeded(operation)),
        _ => Ok(()),
    }
}

/// Stamp the timestamps that entering `to` sets.
fn stamp(subject: &mut Subject, to: SubjectStatus, now: i64) {
    subject.last_updated = now;
    match to {
        SubjectStatus::Confirmed => subject.verified_at = Some(now),
        SubjectStatus::Cleared => subject.cleared_at = Some(now),
        SubjectStatus::Banned => subject.purged_at = Some(now),
        SubjectStatus::Flagged => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::votes::spawn_verifier;
    use tempfile::TempDir;

    fn create_temp_engine() -> (TransitionEngine, Arc<SubjectStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SubjectStore::open(temp_dir.path().join("modqueue.db")).unwrap());
        (TransitionEngine::new(store.clone()), store, temp_dir)
    }

    fn flag(store: &SubjectStore, kind: SubjectKind, id: i64) {
        store.flag(kind, &Subject::new(id, "subject", 0.6, "test")).unwrap();
    }

    #[test]
    fn test_flagged_to_confirmed() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 1);

        let outcome = engine.transition(SubjectKind::User, 1, SubjectStatus::Confirmed).unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Applied {
                from: SubjectStatus::Flagged,
                to: SubjectStatus::Confirmed,
                removed: 1,
                verification: Verification::Completed(0),
            }
        );

        let (status, subject) = store.get(SubjectKind::User, 1).unwrap().unwrap();
        assert_eq!(status, SubjectStatus::Confirmed);
        assert!(subject.verified_at.is_some());
        assert_eq!(store.partition_count(SubjectKind::User, 1).unwrap(), 1);
    }

    #[test]
    fn test_same_state_is_noop() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 1);
        engine.transition(SubjectKind::User, 1, SubjectStatus::Cleared).unwrap();

        let outcome = engine.transition(SubjectKind::User, 1, SubjectStatus::Cleared).unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::NoOp {
                status: SubjectStatus::Cleared
            }
        );
        assert!(!outcome.is_applied());
    }

    #[test]
    fn test_invalid_transition() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::Group, 2);
        engine.transition(SubjectKind::Group, 2, SubjectStatus::Banned).unwrap();

        let err = engine
            .transition(SubjectKind::Group, 2, SubjectStatus::Confirmed)
            .unwrap_err();
        assert!(matches!(
            err,
            ModqueueError::InvalidTransition {
                from: SubjectStatus::Banned,
                to: SubjectStatus::Confirmed,
                ..
            }
        ));
        assert_eq!(store.status_of(SubjectKind::Group, 2).unwrap(), Some(SubjectStatus::Banned));
    }

    #[test]
    fn test_missing_subject() {
        let (engine, _store, _temp) = create_temp_engine();
        let err = engine.transition(SubjectKind::User, 404, SubjectStatus::Cleared).unwrap_err();
        assert!(matches!(err, ModqueueError::SubjectNotFound(SubjectKind::User, 404)));
    }

    #[test]
    fn test_locked_group_round_trip() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::Group, 3);

        engine.transition(SubjectKind::Group, 3, SubjectStatus::Banned).unwrap();
        assert_eq!(store.count(SubjectKind::Group, SubjectStatus::Banned).unwrap(), 1);

        let outcome = engine.transition(SubjectKind::Group, 3, SubjectStatus::Flagged).unwrap();
        assert!(outcome.is_applied());
        let (status, subject) = store.get(SubjectKind::Group, 3).unwrap().unwrap();
        assert_eq!(status, SubjectStatus::Flagged);
        assert!(subject.purged_at.is_some());
    }

    #[test]
    fn test_counters_carried_over() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 5);
        let ledger = engine.ledger();
        ledger.record_vote(SubjectKind::User, 5, 1, false).unwrap();
        ledger.record_vote(SubjectKind::User, 5, 2, false).unwrap();

        engine.transition(SubjectKind::User, 5, SubjectStatus::Confirmed).unwrap();
        let (_, subject) = store.get(SubjectKind::User, 5).unwrap().unwrap();
        assert_eq!(subject.downvotes, 2);
    }

    #[test]
    fn test_inline_verification_on_decision() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 6);
        let ledger = engine.ledger();
        ledger.record_vote(SubjectKind::User, 6, 1, true).unwrap();
        ledger.record_vote(SubjectKind::User, 6, 2, false).unwrap();

        let outcome = engine.transition(SubjectKind::User, 6, SubjectStatus::Cleared).unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Applied {
                verification: Verification::Completed(2),
                ..
            }
        ));
        assert!(ledger.get_vote(SubjectKind::User, 6, 1).unwrap().unwrap().is_correct);
        assert!(!ledger.get_vote(SubjectKind::User, 6, 2).unwrap().unwrap().is_correct);
    }

    #[test]
    fn test_ban_does_not_verify() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 7);
        engine.ledger().record_vote(SubjectKind::User, 7, 1, false).unwrap();

        let outcome = engine.transition(SubjectKind::User, 7, SubjectStatus::Banned).unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Applied {
                verification: Verification::NotApplicable,
                ..
            }
        ));
    }

    #[test]
    fn test_bulk_transition() {
        let (engine, store, _temp) = create_temp_engine();
        for id in 1..=4 {
            flag(&store, SubjectKind::User, id);
        }
        engine.transition(SubjectKind::User, 4, SubjectStatus::Banned).unwrap();

        // 4 is banned and may not move to confirmed; 99 does not exist
        let moved = engine
            .bulk_transition(SubjectKind::User, &[1, 2, 3, 4, 99], SubjectStatus::Confirmed)
            .unwrap();
        assert_eq!(moved, 3);
        assert_eq!(store.count(SubjectKind::User, SubjectStatus::Confirmed).unwrap(), 3);
        assert_eq!(store.count(SubjectKind::User, SubjectStatus::Flagged).unwrap(), 0);
        assert_eq!(store.status_of(SubjectKind::User, 4).unwrap(), Some(SubjectStatus::Banned));

        let (_, subject) = store.get(SubjectKind::User, 2).unwrap().unwrap();
        assert!(subject.verified_at.is_some());
    }

    #[test]
    fn test_deadline_already_passed() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 1);
        let past = Instant::now();

        let err = engine
            .transition_with_deadline(SubjectKind::User, 1, SubjectStatus::Confirmed, Some(past))
            .unwrap_err();
        assert!(matches!(err, ModqueueError::DeadlineExceeded("transition")));

        let err = engine
            .bulk_transition_with_deadline(SubjectKind::User, &[1], SubjectStatus::Banned, Some(past))
            .unwrap_err();
        assert!(matches!(err, ModqueueError::DeadlineExceeded("bulk transition")));

        let (status, _) = store.get(SubjectKind::User, 1).unwrap().unwrap();
        assert_eq!(status, SubjectStatus::Flagged);
    }

    #[test]
    fn test_future_deadline_allows_move() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 1);
        let deadline = Instant::now() + std::time::Duration::from_secs(60);

        let outcome = engine
            .transition_with_deadline(SubjectKind::User, 1, SubjectStatus::Cleared, Some(deadline))
            .unwrap();
        assert!(outcome.is_applied());
    }

    #[test]
    fn test_bulk_transition_empty() {
        let (engine, _store, _temp) = create_temp_engine();
        assert_eq!(
            engine
                .bulk_transition(SubjectKind::Group, &[], SubjectStatus::Cleared)
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_queued_verification() {
        let (engine, store, _temp) = create_temp_engine();
        flag(&store, SubjectKind::User, 8);
        let ledger = engine.ledger();
        ledger.record_vote(SubjectKind::User, 8, 1, false).unwrap();

        let (tx, handle) = spawn_verifier(ledger.clone(), 8);
        let engine = engine.with_verify_queue(tx);

        let outcome = engine.transition(SubjectKind::User, 8, SubjectStatus::Confirmed).unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Applied {
                verification: Verification::Queued,
                ..
            }
        ));

        drop(engine);
        handle.await.unwrap();
        let vote = ledger.get_vote(SubjectKind::User, 8, 1).unwrap().unwrap();
        assert!(vote.is_verified && vote.is_correct);
    }
}
