//! Pipeline counters and the drain barrier

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::events::{attr, Attributes};

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Items accepted by `submit`
    pub total: u64,
    /// Items that reached `succeeded`
    pub successful: u64,
    /// Items that reached `failed`
    pub failed: u64,
    /// `successful + failed`
    pub processed: u64,
    /// Re-enqueues after a failed attempt
    pub retried: u64,
    /// Provider calls made
    pub attempts: u64,
}

impl CounterSnapshot {
    /// Items submitted but not yet terminal
    pub fn outstanding(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }

    /// Counter attributes carried on `progress` and `finished` events
    pub fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(attr::SUCCESSFUL_COUNT.into(), self.successful.into());
        attributes.insert(attr::FAILED_COUNT.into(), self.failed.into());
        attributes.insert(attr::PROCESSED_COUNT.into(), self.processed.into());
        attributes.insert(attr::TOTAL_COUNT.into(), self.total.into());
        attributes
    }
}

/// Shared counters.
///
/// `successful`/`failed` move before the terminal events are published so the
/// events carry them. `settled` moves after, and the drain barrier waits on
/// `settled`, so every terminal event of a batch is delivered before
/// [`wait_drained`](Self::wait_drained) returns.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    attempts: AtomicU64,
    settled: AtomicU64,
    changed: Notify,
}

impl PipelineCounters {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_total(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo `add_total` for a submission that never reached the queue
    pub(crate) fn retract_total(&self) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) -> CounterSnapshot {
        self.successful.fetch_add(1, Ordering::SeqCst);
        self.snapshot()
    }

    pub(crate) fn record_failure(&self) -> CounterSnapshot {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.snapshot()
    }

    /// Mark one terminal item as fully reported
    pub(crate) fn settle(&self) {
        self.settled.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Current values
    pub fn snapshot(&self) -> CounterSnapshot {
        let successful = self.successful.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        CounterSnapshot {
            total: self.total.load(Ordering::SeqCst),
            successful,
            failed,
            processed: successful + failed,
            retried: self.retried.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }

    /// Whether every submitted item has settled
    pub fn is_drained(&self) -> bool {
        self.settled.load(Ordering::SeqCst) >= self.total.load(Ordering::SeqCst)
    }

    /// Wait until every item submitted so far has settled
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of [`WorkerPool::join`](super::WorkerPool::join) or
/// [`WorkerPool::stop`](super::WorkerPool::stop)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Items submitted
    pub total: u64,
    /// Items that succeeded
    pub successful: u64,
    /// Items that were dead-lettered
    pub failed: u64,
    /// `successful + failed`
    pub processed: u64,
    /// Re-enqueues performed
    pub retried: u64,
    /// Items left in the queue (non-zero only after `stop`)
    pub pending: u64,
}

impl DrainReport {
    pub(crate) fn new(snapshot: CounterSnapshot, pending: usize) -> Self {
        Self {
            total: snapshot.total,
            successful: snapshot.successful,
            failed: snapshot.failed,
            processed: snapshot.processed,
            retried: snapshot.retried,
            pending: pending as u64,
        }
    }

    /// Whether every submitted item reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.processed == self.total
    }
}
