//! BanSweep: moves subjects the platform has already banned into Banned.
//!
//! Each pass claims a batch of subjects due for a ban check, asks the
//! platform about them in one call and bulk-moves the banned ones. Claiming
//! stamps `last_ban_check`, so concurrent sweepers never check the same
//! subject twice within the staleness window.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ModqueueError, Result};
use crate::scheduler::{ClaimPurpose, Scheduler};
use crate::store::{SubjectKind, SubjectStatus};
use crate::transition::TransitionEngine;
use crate::worker::platform::PlatformApi;

/// Default subjects checked per pass.
pub const DEFAULT_SWEEP_BATCH: usize = 100;
/// Default pause between passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Subjects claimed and sent to the platform
    pub checked: usize,
    /// Subjects moved into Banned
    pub banned: usize,
}

/// Periodic ban-check worker.
pub struct BanSweep {
    scheduler: Arc<Scheduler>,
    engine: Arc<TransitionEngine>,
    api: Arc<dyn PlatformApi>,
    batch_size: usize,
    interval: Duration,
}

impl BanSweep {
    pub fn new(scheduler: Arc<Scheduler>, engine: Arc<TransitionEngine>, api: Arc<dyn PlatformApi>) -> Self {
        Self {
            scheduler,
            engine,
            api,
            batch_size: DEFAULT_SWEEP_BATCH,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run a single pass.
    pub async fn run_once(&self, kind: SubjectKind) -> Result<SweepReport> {
        let scheduler = self.scheduler.clone();
        let batch_size = self.batch_size;
        let ids = tokio::task::spawn_blocking(move || scheduler.claim_batch(ClaimPurpose::BanCheck { kind }, batch_size))
            .await
            .map_err(|e| ModqueueError::Storage(e.to_string()))??;
        if ids.is_empty() {
            return Ok(SweepReport::default());
        }

        let claimed: HashSet<i64> = ids.iter().copied().collect();
        let banned: Vec<i64> = self
            .api
            .banned_ids(kind, &ids)
            .await?
            .into_iter()
            .filter(|id| claimed.contains(id))
            .collect();

        let moved = if banned.is_empty() {
            0
        } else {
            let engine = self.engine.clone();
            tokio::task::spawn_blocking(move || engine.bulk_transition(kind, &banned, SubjectStatus::Banned))
                .await
                .map_err(|e| ModqueueError::Storage(e.to_string()))??
        };

        log::info!("Ban sweep checked {} {}s, moved {} to banned", ids.len(), kind, moved);
        Ok(SweepReport {
            checked: ids.len(),
            banned: moved,
        })
    }

    /// Sweep until `shutdown` fires. Failed passes are logged and retried on
    /// the next interval.
    ///
    /// Shutdown is only observed between passes. A pass that has claimed its
    /// batch always finishes, since its rows are already stamped as checked.
    pub async fn run(&self, kind: SubjectKind, shutdown: CancellationToken) -> SweepReport {
        let mut total = SweepReport::default();
        log::info!("Ban sweep for {}s started", kind);

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.run_once(kind).await {
                Ok(report) => {
                    total.checked += report.checked;
                    total.banned += report.banned;
                }
                Err(e) => log::error!("Ban sweep pass failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        log::info!(
            "Ban sweep for {}s stopped after {} checks, {} bans",
            kind,
            total.checked,
            total.banned
        );
        total
    }

    /// Sweep several kinds concurrently until `shutdown` fires.
    pub async fn run_all(&self, kinds: &[SubjectKind], shutdown: CancellationToken) -> SweepReport {
        let reports = join_all(kinds.iter().map(|kind| self.run(*kind, shutdown.clone()))).await;
        reports.into_iter().fold(SweepReport::default(), |mut total, report| {
            total.checked += report.checked;
            total.banned += report.banned;
            total
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Subject, SubjectStore};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Bans every id divisible by three, and also reports an id it was never
    /// asked about.
    struct FakePlatform;

    #[async_trait]
    impl PlatformApi for FakePlatform {
        async fn banned_ids(&self, _kind: SubjectKind, ids: &[i64]) -> Result<Vec<i64>> {
            let mut banned: Vec<i64> = ids.iter().copied().filter(|id| id % 3 == 0).collect();
            banned.push(10_000);
            Ok(banned)
        }
    }

    struct DownPlatform;

    #[async_trait]
    impl PlatformApi for DownPlatform {
        async fn banned_ids(&self, _kind: SubjectKind, _ids: &[i64]) -> Result<Vec<i64>> {
            Err(ModqueueError::Platform("HTTP 503".to_string()))
        }
    }

    /// Like `FakePlatform`, but takes a while to answer.
    struct SlowPlatform;

    #[async_trait]
    impl PlatformApi for SlowPlatform {
        async fn banned_ids(&self, kind: SubjectKind, ids: &[i64]) -> Result<Vec<i64>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            FakePlatform.banned_ids(kind, ids).await
        }
    }

    fn create_sweep(api: Arc<dyn PlatformApi>) -> (BanSweep, Arc<SubjectStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SubjectStore::open(temp_dir.path().join("modqueue.db")).unwrap());
        for id in 1..=9 {
            store
                .flag(SubjectKind::User, &Subject::new(id, "subject", 0.5, "test"))
                .unwrap();
        }
        let sweep = BanSweep::new(
            Arc::new(Scheduler::new(store.clone())),
            Arc::new(TransitionEngine::new(store.clone())),
            api,
        );
        (sweep, store, temp_dir)
    }

    #[tokio::test]
    async fn test_run_once_moves_banned() {
        let (sweep, store, _temp) = create_sweep(Arc::new(FakePlatform));

        let report = sweep.run_once(SubjectKind::User).await.unwrap();
        assert_eq!(report, SweepReport { checked: 9, banned: 3 });
        assert_eq!(store.count(SubjectKind::User, SubjectStatus::Banned).unwrap(), 3);
        assert_eq!(store.status_of(SubjectKind::User, 10_000).unwrap(), None);

        // Everything was just checked, so the next pass finds nothing due
        let report = sweep.run_once(SubjectKind::User).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_batch_size_limits_pass() {
        let (sweep, _store, _temp) = create_sweep(Arc::new(FakePlatform));
        let sweep = sweep.with_batch_size(4);

        let report = sweep.run_once(SubjectKind::User).await.unwrap();
        assert_eq!(report.checked, 4);
    }

    #[tokio::test]
    async fn test_platform_error_propagates() {
        let (sweep, store, _temp) = create_sweep(Arc::new(DownPlatform));
        assert!(sweep.run_once(SubjectKind::User).await.is_err());
        assert_eq!(store.count(SubjectKind::User, SubjectStatus::Banned).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweep, _store, _temp) = create_sweep(Arc::new(DownPlatform));
        let sweep = sweep.with_interval(Duration::from_millis(10));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let report = sweep.run(SubjectKind::User, shutdown).await;
        assert_eq!(report.banned, 0);
    }

    #[tokio::test]
    async fn test_shutdown_lets_started_pass_finish() {
        let (sweep, store, _temp) = create_sweep(Arc::new(SlowPlatform));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = sweep.run(SubjectKind::User, shutdown).await;
        assert_eq!(report, SweepReport { checked: 9, banned: 3 });
        assert_eq!(store.count(SubjectKind::User, SubjectStatus::Banned).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_claims_nothing() {
        let (sweep, _store, _temp) = create_sweep(Arc::new(FakePlatform));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(sweep.run(SubjectKind::User, shutdown).await, SweepReport::default());

        // Nothing was stamped, so every subject is still due
        let report = sweep.run_once(SubjectKind::User).await.unwrap();
        assert_eq!(report.checked, 9);
    }

    #[tokio::test]
    async fn test_run_all_kinds() {
        let (sweep, store, _temp) = create_sweep(Arc::new(FakePlatform));
        store
            .flag(SubjectKind::Group, &Subject::new(6, "group", 0.5, "test"))
            .unwrap();

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let report = sweep.run_all(&[SubjectKind::User, SubjectKind::Group], shutdown).await;
        assert_eq!(report, SweepReport { checked: 10, banned: 4 });
        assert_eq!(store.status_of(SubjectKind::Group, 6).unwrap(), Some(SubjectStatus::Banned));
    }
}
