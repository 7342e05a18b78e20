use std::sync::Arc;
use std::time::Duration;

use bulk_fetcher::pipeline::{PipelineError, WorkerPool};
use bulk_fetcher::shutdown::ShutdownCoordinator;
use bulk_fetcher::task::ProviderClients;
use bulk_fetcher::WorkItem;
use tempfile::TempDir;

use super::common::{test_config, Behavior, ScriptedProvider};

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// A request made before anyone waits must still be seen by later waiters.
#[tokio::test]
async fn shutdown_requested_before_wait_does_not_deadlock() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() deadlocked despite shutdown already requested");
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

/// An external shutdown (Ctrl+C in the binary) stops idle workers.
#[tokio::test]
async fn shared_shutdown_stops_pool() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider))
        .with_shutdown(shutdown.clone())
        .start()
        .unwrap();
    assert_eq!(pool.live_workers(), 4);

    shutdown.request_shutdown();
    let report = tokio::time::timeout(Duration::from_secs(1), pool.stop(true))
        .await
        .expect("workers exit promptly")
        .unwrap();

    assert_eq!(pool.live_workers(), 0);
    assert_eq!(report.total, 0);
    assert!(matches!(
        pool.submit(WorkItem::new("daily", "A")).await,
        Err(PipelineError::Stopped)
    ));
}

/// Shutdown while a worker waits for a rate limit token puts the item back.
#[tokio::test(start_paused = true)]
async fn shutdown_during_token_wait_requeues_item() {
    use bulk_fetcher::rate_limit::RateConfig;

    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));
    let config = test_config(dir.path())
        .with_worker_count(1)
        .with_rate("daily", RateConfig::per_minute(1));

    let pool = WorkerPool::builder(config, ProviderClients::single(provider.clone()))
        .start()
        .unwrap();
    pool.submit_all(["A", "B"].map(|key| WorkItem::new("daily", key)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let report = pool.stop(true).await.unwrap();

    assert_eq!(provider.calls_for("A"), 1);
    assert_eq!(provider.calls_for("B"), 0);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.pending, 1);
}
