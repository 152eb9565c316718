//! Shared rate limiter integration tests

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use modqueue::error::Result;
use modqueue::id::now_ms;
use modqueue::ratelimit::{RateLimiter, SqliteWindowStore, WindowStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(30);

/// Sleep until early in a wall-clock second so a short burst stays inside it.
async fn align_to_second_start() {
    let offset = now_ms().rem_euclid(1000);
    if offset > 100 {
        tokio::time::sleep(Duration::from_millis((1000 - offset) as u64 + 5)).await;
    }
}

/// Twelve calls inside one second against a ceiling of ten admit ten.
#[tokio::test]
async fn test_twelve_calls_ceiling_ten() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = Arc::new(SqliteWindowStore::open(temp_dir.path().join("limits.db"), TIMEOUT)?);
    let limiter = RateLimiter::new(store, 10);

    align_to_second_start().await;
    let mut admitted = 0;
    for _ in 0..12 {
        if limiter.try_acquire("platform").await {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
    Ok(())
}

/// Limiters in different "processes" share one ceiling through the file.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_limiters_share_ceiling() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("limits.db");

    let limiters: Vec<RateLimiter> = (0..4)
        .map(|_| {
            let store: Arc<dyn WindowStore> = Arc::new(SqliteWindowStore::open(&path, TIMEOUT)?);
            Ok(RateLimiter::new(store, 10))
        })
        .collect::<Result<_>>()?;

    align_to_second_start().await;
    let attempts = limiters
        .iter()
        .flat_map(|limiter| (0..5).map(move |_| limiter.try_acquire("platform")));
    let admitted = join_all(attempts).await.into_iter().filter(|ok| *ok).count();

    assert!(admitted <= 10, "admitted {admitted}");
    assert!(admitted >= 1);
    Ok(())
}

/// `acquire` eventually gets through once the window slides.
#[tokio::test]
async fn test_acquire_blocks_then_admits() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = Arc::new(SqliteWindowStore::open(temp_dir.path().join("limits.db"), TIMEOUT)?);
    let limiter = RateLimiter::new(store, 2).with_retry_interval(Duration::from_millis(20));
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        tokio::time::timeout(Duration::from_secs(10), limiter.acquire("platform", &cancel))
            .await
            .expect("acquire should not hang")?;
    }
    Ok(())
}
