//! Worker loop and per-item outcome handling

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::config::calculate_backoff;
use super::progress::{CounterSnapshot, PipelineCounters};
use super::queue::WorkQueue;
use crate::dead_letter::DeadLetterStore;
use crate::events::{attr, Attributes, EventBus, EventKind};
use crate::metrics::{self, FetchMetrics};
use crate::rate_limit::RateLimiter;
use crate::shutdown::SharedShutdown;
use crate::sink::ResultSink;
use crate::task::{invoke, BoundTask, ProviderClients, ProviderError, TaskBuilder};
use crate::{FetchResult, Payload, WorkItem};

/// Retry and timeout settings copied out of the pipeline configuration
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub max_retries: u32,
    pub acquire_timeout: Duration,
    pub fetch_timeout: Option<Duration>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// State shared by every worker of one pool
pub(crate) struct WorkerContext {
    pub name: String,
    pub queue: Arc<WorkQueue>,
    pub limiter: Arc<RateLimiter>,
    pub builder: TaskBuilder,
    pub clients: ProviderClients,
    pub sink: Arc<dyn ResultSink>,
    pub dead_letters: Arc<DeadLetterStore>,
    pub bus: Arc<EventBus>,
    pub counters: Arc<PipelineCounters>,
    pub shutdown: SharedShutdown,
    pub settings: WorkerSettings,
    pub worker_count: usize,
    pub live_workers: AtomicUsize,
    pub workers_exited: Notify,
    /// Set once `finished` has been published for the current batch
    pub finished: AtomicBool,
}

/// Decrements the live worker count when a worker ends, however it ends
struct LiveGuard<'a>(&'a WorkerContext);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.live_workers.fetch_sub(1, Ordering::SeqCst);
        self.0.workers_exited.notify_waiters();
    }
}

/// How one attempt ended
enum Outcome {
    Success { key: String, payload: Payload },
    Retryable(String),
    Terminal(String),
}

impl WorkerContext {
    /// Publish the finished event unless it was already published for this batch
    pub fn publish_finished(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let snapshot = self.counters.snapshot();
        let mut attributes = snapshot.to_attributes();
        attributes.insert(attr::PENDING_COUNT.into(), (self.queue.len() as u64).into());
        self.bus
            .publish_kind(EventKind::Finished, &self.name, attributes);
    }

    /// Wait until every worker has returned
    pub async fn wait_workers_exited(&self) {
        loop {
            let notified = self.workers_exited.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.live_workers.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Body of one worker task. Returns when the queue is closed and drained
    /// or when shutdown is requested.
    pub async fn run_worker(self: Arc<Self>, worker_id: usize) {
        let _live = LiveGuard(&*self);
        debug!(worker = worker_id, "Worker started");

        loop {
            if self.shutdown.is_shutdown_requested() {
                debug!(worker = worker_id, "Shutdown requested, worker exiting");
                break;
            }

            let item = tokio::select! {
                biased;
                _ = self.shutdown.wait_for_shutdown() => break,
                item = self.queue.pop() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            metrics::record_queue_depth(self.queue.len());

            let label = item.label();
            if let Err(panic) = AssertUnwindSafe(self.process(item)).catch_unwind().await {
                error!(
                    worker = worker_id,
                    item = %label,
                    panic = %panic_message(&*panic),
                    "Item handling panicked, worker continues"
                );
            }
        }

        debug!(worker = worker_id, "Worker stopped");
    }

    async fn process(&self, item: WorkItem) {
        let task = match self
            .builder
            .build(&item.category, &item.key, &item.overrides)
        {
            Ok(task) => task,
            Err(e) => {
                // Retrying cannot fix a missing template or a malformed key
                let attempts = item.retry_count;
                self.fail(item, e.to_string(), attempts).await;
                return;
            }
        };

        let acquired = tokio::select! {
            biased;
            _ = self.shutdown.wait_for_shutdown() => None,
            acquired = self.limiter.acquire(&task.category, Some(self.settings.acquire_timeout)) => Some(acquired),
        };
        let Some(acquired) = acquired else {
            // Never attempted; leave it queued
            self.queue.requeue(item);
            return;
        };

        let outcome = if acquired {
            self.attempt(&task).await
        } else {
            Outcome::Retryable(format!(
                "rate limit token not available within {:.1}s",
                self.settings.acquire_timeout.as_secs_f64()
            ))
        };

        match outcome {
            Outcome::Success { key, payload } => self.succeed(item, key, payload),
            Outcome::Retryable(reason) => self.retry_or_fail(item, reason).await,
            Outcome::Terminal(reason) => {
                let attempts = item.retry_count + 1;
                self.fail(item, reason, attempts).await;
            }
        }
    }

    /// One provider call. Panics and timeouts count as transient failures.
    async fn attempt(&self, task: &BoundTask) -> Outcome {
        self.counters.record_attempt();
        let fetch_metrics = FetchMetrics::start(&task.category);
        let call = AssertUnwindSafe(invoke(task, &self.clients)).catch_unwind();

        let result = match self.settings.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    fetch_metrics.record("timeout");
                    return Outcome::Retryable(format!(
                        "provider call timed out after {:.1}s",
                        limit.as_secs_f64()
                    ));
                }
            },
            None => call.await,
        };

        match result {
            Ok(Ok(payload)) => {
                fetch_metrics.record("success");
                Outcome::Success {
                    key: task.key.clone(),
                    payload,
                }
            }
            Ok(Err(e)) => {
                fetch_metrics.record("error");
                match e {
                    ProviderError::Transient(_) => Outcome::Retryable(e.to_string()),
                    ProviderError::Permanent(_) => Outcome::Terminal(e.to_string()),
                }
            }
            Err(panic) => {
                fetch_metrics.record("panic");
                Outcome::Retryable(format!("provider panicked: {}", panic_message(&*panic)))
            }
        }
    }

    fn succeed(&self, item: WorkItem, key: String, payload: Payload) {
        let rows = payload.len();
        let snapshot = self.counters.record_success();

        let mut attributes = item_attributes(&item, &snapshot);
        attributes.insert(attr::ROWS.into(), (rows as u64).into());
        attributes.insert(attr::ATTEMPTS.into(), (item.retry_count + 1).into());
        self.bus
            .publish_kind(EventKind::Succeeded, &self.name, attributes);

        if payload.is_empty() {
            debug!(item = %item.label(), "Fetch returned no rows");
        } else {
            let result = FetchResult {
                key,
                category: item.category.clone(),
                payload,
                success: true,
            };
            let sink = &self.sink;
            match std::panic::catch_unwind(AssertUnwindSafe(|| sink.accept(result))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(item = %item.label(), error = %e, "Result sink refused result"),
                Err(panic) => error!(
                    item = %item.label(),
                    panic = %panic_message(&*panic),
                    "Result sink panicked"
                ),
            }
        }

        self.publish_progress(&item, &snapshot);
        self.counters.settle();
    }

    async fn retry_or_fail(&self, mut item: WorkItem, reason: String) {
        item.retry_count += 1;
        if item.retry_count > self.settings.max_retries {
            error!(
                item = %item.label(),
                retry_count = item.retry_count,
                max_retries = self.settings.max_retries,
                reason = %reason,
                "Max retries exceeded"
            );
            let attempts = item.retry_count;
            self.fail(item, reason, attempts).await;
            return;
        }

        self.counters.record_retry();
        metrics::record_item_retried(&item.category, item.retry_count);

        let backoff = calculate_backoff(
            self.settings.initial_backoff_ms,
            self.settings.max_backoff_ms,
            item.retry_count,
        );
        warn!(
            item = %item.label(),
            retry_count = item.retry_count,
            max_retries = self.settings.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            reason = %reason,
            "Re-enqueueing after failed attempt"
        );
        if !backoff.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {},
                _ = self.shutdown.wait_for_shutdown() => {},
            }
        }
        self.queue.requeue(item);
    }

    async fn fail(&self, item: WorkItem, reason: String, attempts: u32) {
        let store = self.dead_letters.clone();
        let category = item.category.clone();
        let key = item.key.clone();
        let recorded = match tokio::task::spawn_blocking(move || store.record(&category, &key)).await {
            Ok(Ok(added)) => {
                debug!(item = %item.label(), added, "Recorded dead letter");
                true
            }
            Ok(Err(e)) => {
                error!(item = %item.label(), error = %e, "Failed to record dead letter");
                false
            }
            Err(e) => {
                error!(item = %item.label(), error = %e, "Dead-letter task did not complete");
                false
            }
        };

        let snapshot = self.counters.record_failure();
        info!(item = %item.label(), attempts, reason = %reason, "Item failed permanently");

        let mut attributes = item_attributes(&item, &snapshot);
        attributes.insert(attr::REASON.into(), reason.into());
        attributes.insert(attr::ATTEMPTS.into(), attempts.into());
        attributes.insert(attr::DEAD_LETTER_RECORDED.into(), recorded.into());
        self.bus.publish_kind(EventKind::Failed, &self.name, attributes);

        self.publish_progress(&item, &snapshot);
        self.counters.settle();
    }

    fn publish_progress(&self, item: &WorkItem, snapshot: &CounterSnapshot) {
        self.bus
            .publish_kind(EventKind::Progress, &self.name, item_attributes(item, snapshot));
    }
}

fn item_attributes(item: &WorkItem, snapshot: &CounterSnapshot) -> Attributes {
    let mut attributes = snapshot.to_attributes();
    attributes.insert(attr::CATEGORY.into(), item.category.clone().into());
    attributes.insert(attr::KEY.into(), item.key.clone().into());
    attributes
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
