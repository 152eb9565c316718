//! Background vote verification.
//!
//! The transition engine can hand verification off instead of running it
//! inline. Requests are drained by a single task that runs each one on the
//! blocking pool, since ledger writes are synchronous SQLite calls.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::SubjectKind;
use crate::votes::VoteLedger;

/// Default queue depth for pending verifications.
pub const DEFAULT_VERIFY_QUEUE: usize = 256;

/// A subject whose votes should be verified against its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyRequest {
    pub kind: SubjectKind,
    pub subject_id: i64,
    pub was_inappropriate: bool,
}

/// Start a verifier task. It exits once every sender has been dropped and
/// the queue is drained.
pub fn spawn_verifier(ledger: Arc<VoteLedger>, capacity: usize) -> (mpsc::Sender<VerifyRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<VerifyRequest>(capacity);

    let handle = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let ledger = ledger.clone();
            let result = tokio::task::spawn_blocking(move || {
                ledger.verify_votes(request.kind, request.subject_id, request.was_inappropriate)
            })
            .await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::error!(
                    "Vote verification for {} {} failed: {}",
                    request.kind,
                    request.subject_id,
                    e
                ),
                Err(e) => log::error!("Vote verification task panicked: {}", e),
            }
        }
        log::debug!("Vote verifier stopped");
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Subject, SubjectStore};

    #[tokio::test]
    async fn test_verifier_drains_queue() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(SubjectStore::open(temp_dir.path().join("modqueue.db")).unwrap());
        store.flag(SubjectKind::Group, &Subject::new(3, "g", 0.4, "r")).unwrap();

        let ledger = Arc::new(VoteLedger::new(store));
        ledger.record_vote(SubjectKind::Group, 3, 1, true).unwrap();

        let (tx, handle) = spawn_verifier(ledger.clone(), 4);
        tx.send(VerifyRequest {
            kind: SubjectKind::Group,
            subject_id: 3,
            was_inappropriate: false,
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let vote = ledger.get_vote(SubjectKind::Group, 3, 1).unwrap().unwrap();
        assert!(vote.is_verified);
        assert!(vote.is_correct);
    }
}
