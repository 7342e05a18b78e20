//! Integration tests for the worker pool: drain, outcomes and lifecycle

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulk_fetcher::dead_letter::{self, DeadLetterStore};
use bulk_fetcher::events::{attr, EventBus, EventKind};
use bulk_fetcher::pipeline::{PipelineError, WorkerPool};
use bulk_fetcher::sink::{MemorySink, ResultSink, SinkError};
use bulk_fetcher::task::ProviderClients;
use bulk_fetcher::{FetchResult, WorkItem};
use tempfile::TempDir;

use super::common::{test_config, Behavior, ScriptedProvider};

fn items(keys: &[&str]) -> Vec<WorkItem> {
    keys.iter().map(|key| WorkItem::new("daily", *key)).collect()
}

/// Stores results but panics on one key
struct PanickingSink {
    panic_on: &'static str,
    inner: MemorySink,
}

impl ResultSink for PanickingSink {
    fn accept(&self, result: FetchResult) -> Result<(), SinkError> {
        if result.key == self.panic_on {
            panic!("sink cannot take {}", result.key);
        }
        self.inner.accept(result)
    }
}

/// Collects `(key, dead_letter_recorded)` from every `failed` event
fn record_failures(bus: &EventBus) -> Arc<std::sync::Mutex<Vec<(String, Option<bool>)>>> {
    let failures = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = failures.clone();
    bus.subscribe_kind(EventKind::Failed, move |event| {
        seen.lock().unwrap().push((
            event.attr_str(attr::KEY).unwrap_or_default().to_string(),
            event.attr_bool(attr::DEAD_LETTER_RECORDED),
        ));
        Ok(())
    });
    failures
}

#[tokio::test]
async fn test_drain_accounts_for_every_item() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(Behavior::Rows(3))
            .with("E1", Behavior::Empty)
            .with("P1", Behavior::Permanent)
            .with("P2", Behavior::Permanent)
            .with("F1", Behavior::FailTimes(1, 2))
            .with("T1", Behavior::Transient),
    );
    let sink = Arc::new(MemorySink::new());

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider.clone()))
        .with_sink(sink.clone())
        .start()
        .unwrap();

    let mut keys: Vec<String> = (0..15).map(|i| format!("K{i}")).collect();
    keys.extend(["E1", "P1", "P2", "F1", "T1"].map(String::from));
    let report = pool
        .run(keys.iter().map(|key| WorkItem::new("daily", key.as_str())))
        .await
        .unwrap();

    assert_eq!(report.total, 20);
    assert_eq!(report.processed, 20);
    assert_eq!(report.successful + report.failed, report.processed);
    assert_eq!(report.successful, 17);
    assert_eq!(report.failed, 3);
    assert_eq!(report.pending, 0);
    assert!(report.is_complete());

    // Empty payloads are not forwarded
    let results = sink.drain();
    assert_eq!(results.len(), 16);
    assert!(results.iter().all(|r| r.success && !r.payload.is_empty()));

    let dead = DeadLetterStore::new(dir.path()).read(&dead_letter::today()).unwrap();
    let mut failed_keys = dead["daily"].clone();
    failed_keys.sort();
    assert_eq!(failed_keys, vec!["P1", "P2", "T1"]);
    assert_eq!(provider.calls_for("T1"), 3);
    assert_eq!(provider.calls_for("P1"), 1);
    assert_eq!(provider.calls_for("F1"), 2);
}

#[tokio::test]
async fn test_empty_result_is_success_without_dead_letter() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Empty));
    let bus = Arc::new(EventBus::new());
    let rows = Arc::new(AtomicUsize::new(usize::MAX));
    {
        let rows = rows.clone();
        bus.subscribe_kind(EventKind::Succeeded, move |event| {
            rows.store(event.attr_u64(attr::ROWS).unwrap() as usize, Ordering::SeqCst);
            Ok(())
        });
    }

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider))
        .with_event_bus(bus)
        .start()
        .unwrap();
    let report = pool.run(items(&["HALTED"])).await.unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(rows.load(Ordering::SeqCst), 0);
    assert!(DeadLetterStore::new(dir.path()).list_dates().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_category_fails_without_calling_provider() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));
    let bus = Arc::new(EventBus::new());
    let reasons = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let reasons = reasons.clone();
        bus.subscribe_kind(EventKind::Failed, move |event| {
            reasons.lock().unwrap().push((
                event.attr_str(attr::REASON).unwrap_or_default().to_string(),
                event.attr_u64(attr::ATTEMPTS).unwrap(),
            ));
            Ok(())
        });
    }

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider.clone()))
        .with_event_bus(bus)
        .start()
        .unwrap();
    let report = pool
        .run(vec![WorkItem::new("weekly", "600000"), WorkItem::new("daily", "OK")])
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.successful, 1);
    assert_eq!(provider.total_calls(), 1);

    let reasons = reasons.lock().unwrap();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].0.contains("weekly"), "reason: {}", reasons[0].0);
    assert_eq!(reasons[0].1, 0);

    let dead = DeadLetterStore::new(dir.path()).read(&dead_letter::today()).unwrap();
    assert_eq!(dead["weekly"], vec!["600000"]);
}

#[tokio::test]
async fn test_panicking_provider_does_not_kill_workers() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)).with("BOOM", Behavior::Panic));
    let config = test_config(dir.path()).with_worker_count(1);

    let pool = WorkerPool::builder(config, ProviderClients::single(provider.clone()))
        .start()
        .unwrap();
    let report = pool.run(items(&["BOOM", "A", "B"])).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.successful, 2);
    // max_retries = 2 => three attempts
    assert_eq!(provider.calls_for("BOOM"), 3);
}

#[tokio::test]
async fn test_category_wide_item() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(2)));
    let sink = Arc::new(MemorySink::new());

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider.clone()))
        .with_sink(sink.clone())
        .start()
        .unwrap();
    let report = pool.run(vec![WorkItem::category_wide("daily")]).await.unwrap();

    assert_eq!(report.successful, 1);
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].key, "");
    assert_eq!(calls[0].method, "daily");
    assert_eq!(sink.drain()[0].key, "");
}

#[tokio::test]
async fn test_fetch_timeout_is_retried_then_fails() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Slow(Duration::from_secs(30), 1)));
    let mut config = test_config(dir.path()).with_max_retries(1);
    config.fetch_timeout_secs = Some(0.05);

    let pool = WorkerPool::builder(config, ProviderClients::single(provider.clone()))
        .start()
        .unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), pool.run(items(&["SLOW"])))
        .await
        .expect("timeouts should bound the run")
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 1);
    assert_eq!(provider.calls_for("SLOW"), 2);
}

#[tokio::test]
async fn test_finished_published_once_per_batch() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));
    let bus = Arc::new(EventBus::new());
    let finished = Arc::new(AtomicUsize::new(0));
    {
        let finished = finished.clone();
        bus.subscribe_kind(EventKind::Finished, move |_| {
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider))
        .with_event_bus(bus)
        .start()
        .unwrap();

    pool.submit_all(items(&["A", "B"])).await.unwrap();
    pool.join().await;
    pool.join().await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    pool.submit(WorkItem::new("daily", "C")).await.unwrap();
    let report = pool.join().await;
    assert_eq!(report.total, 3);
    assert_eq!(finished.load(Ordering::SeqCst), 2);

    pool.stop(true).await;
    assert_eq!(finished.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stop_leaves_queued_items_pending() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Slow(Duration::from_millis(200), 1)));
    let config = test_config(dir.path()).with_worker_count(1);

    let pool = WorkerPool::builder(config, ProviderClients::single(provider.clone()))
        .start()
        .unwrap();
    pool.submit_all(items(&["A", "B", "C", "D", "E"])).await.unwrap();

    // Let the single worker pick up the first item
    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = pool.stop(true).await.expect("wait=true returns a report");

    assert_eq!(pool.live_workers(), 0);
    assert!(pool.is_stopped());
    assert_eq!(report.total, 5);
    assert_eq!(report.processed, 1, "in-flight item completes");
    assert_eq!(report.pending, 4);
    assert!(!report.is_complete());
    assert_eq!(provider.total_calls(), 1);

    assert!(matches!(
        pool.submit(WorkItem::new("daily", "F")).await,
        Err(PipelineError::Stopped)
    ));
}

#[tokio::test]
async fn test_submit_after_close_is_rejected() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));
    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider))
        .start()
        .unwrap();

    pool.close();
    assert!(matches!(
        pool.submit(WorkItem::new("daily", "A")).await,
        Err(PipelineError::QueueClosed)
    ));
    let report = pool.join().await;
    assert_eq!(report.total, 0);
}

#[tokio::test]
async fn test_redrive_resubmits_dead_letters() {
    let dir = TempDir::new().unwrap();
    let store = DeadLetterStore::new(dir.path());
    let date = dead_letter::today();

    let failing = Arc::new(ScriptedProvider::new(Behavior::Permanent));
    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(failing))
        .start()
        .unwrap();
    let report = pool.run(items(&["A", "B"])).await.unwrap();
    assert_eq!(report.failed, 2);
    drop(pool);

    let healthy = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));
    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(healthy.clone()))
        .start()
        .unwrap();
    assert_eq!(pool.redrive(&store, &date).await.unwrap(), 2);
    pool.close();
    let report = pool.join().await;

    assert_eq!(report.successful, 2);
    assert_eq!(healthy.calls_for("A"), 1);
    assert_eq!(healthy.calls_for("B"), 1);
}

#[tokio::test]
async fn test_invalid_config_rejected_at_start() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));
    let config = test_config(dir.path()).with_worker_count(0);
    assert!(matches!(
        WorkerPool::builder(config, ProviderClients::single(provider)).start(),
        Err(PipelineError::Config(_))
    ));
}

#[tokio::test]
async fn test_panicking_sink_does_not_kill_workers() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(2)));
    let sink = Arc::new(PanickingSink {
        panic_on: "A",
        inner: MemorySink::new(),
    });
    let config = test_config(dir.path()).with_worker_count(1);

    let pool = WorkerPool::builder(config, ProviderClients::single(provider.clone()))
        .with_sink(sink.clone())
        .start()
        .unwrap();
    pool.submit_all(items(&["A", "B", "C"])).await.unwrap();

    // The only worker must survive the panic and settle every item
    let counters = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let counters = pool.counters();
            if counters.processed == 3 {
                return counters;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("items never settled");
    assert_eq!(counters.successful, 3);
    assert_eq!(pool.live_workers(), 1);

    pool.close();
    let report = pool.join().await;
    assert_eq!(report.pending, 0);
    assert!(report.is_complete());
    assert_eq!(provider.calls_for("A"), 1);

    let mut stored: Vec<String> = sink.inner.drain().into_iter().map(|r| r.key).collect();
    stored.sort();
    assert_eq!(stored, vec!["B", "C"]);
}

#[tokio::test]
async fn test_failed_event_reports_dead_letter_recorded() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Permanent));
    let bus = Arc::new(EventBus::new());
    let failures = record_failures(&bus);

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider))
        .with_event_bus(bus)
        .start()
        .unwrap();
    let report = pool.run(items(&["P1"])).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(*failures.lock().unwrap(), vec![("P1".to_string(), Some(true))]);
}

#[tokio::test]
async fn test_failed_event_reports_unwritable_dead_letter_store() {
    let dir = TempDir::new().unwrap();
    // A regular file where the dead-letter directory should go
    let occupied = dir.path().join("dead_letter");
    std::fs::write(&occupied, "not a directory").unwrap();

    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)).with("P1", Behavior::Permanent));
    let bus = Arc::new(EventBus::new());
    let failures = record_failures(&bus);

    let pool = WorkerPool::builder(test_config(&occupied), ProviderClients::single(provider))
        .with_event_bus(bus)
        .start()
        .unwrap();
    let report = pool.run(items(&["P1", "OK"])).await.unwrap();

    // The item still ends as failed and the pool keeps going
    assert_eq!(report.failed, 1);
    assert_eq!(report.successful, 1);
    assert!(report.is_complete());
    assert_eq!(*failures.lock().unwrap(), vec![("P1".to_string(), Some(false))]);
}

#[tokio::test]
async fn test_empty_category_is_dead_lettered() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(Behavior::Rows(1)));
    let bus = Arc::new(EventBus::new());
    let failures = record_failures(&bus);

    let pool = WorkerPool::builder(test_config(dir.path()), ProviderClients::single(provider.clone()))
        .with_event_bus(bus)
        .start()
        .unwrap();
    let report = pool.run(vec![WorkItem::new("", "600000")]).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(provider.total_calls(), 0);
    assert_eq!(*failures.lock().unwrap(), vec![("600000".to_string(), Some(true))]);

    let dead = DeadLetterStore::new(dir.path()).read(&dead_letter::today()).unwrap();
    assert_eq!(dead[""], vec!["600000"]);
}
