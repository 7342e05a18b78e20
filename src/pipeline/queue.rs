//! Bounded FIFO work queue
//!
//! Fresh submissions wait for space once `capacity` items are queued. Retries go
//! through [`WorkQueue::requeue`], which ignores the bound: the workers are the
//! only consumers, so a worker blocked on its own re-enqueue would deadlock a
//! full queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

use crate::WorkItem;

/// Queue errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    /// The queue no longer accepts submissions
    #[error("work queue is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

/// Multi-producer, multi-consumer FIFO of [`WorkItem`]s
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` fresh submissions
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append a fresh item, waiting while the queue is full.
    ///
    /// # Errors
    /// [`QueueError::Closed`] if the queue is closed before the item fits.
    pub async fn push(&self, item: WorkItem) -> Result<(), QueueError> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if state.items.len() < self.capacity {
                    trace!(item = %item.label(), depth = state.items.len() + 1, "Enqueued");
                    state.items.push_back(item);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Put an item back at the tail, regardless of capacity or closure.
    pub fn requeue(&self, item: WorkItem) {
        let mut state = self.lock();
        trace!(item = %item.label(), retry = item.retry_count, "Re-enqueued");
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Take the next item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<WorkItem> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next item if one is queued
    pub fn try_pop(&self) -> Option<WorkItem> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Stop accepting submissions. Queued items stay poppable.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bound on fresh submissions
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
