//! In-process event bus
//!
//! Handlers subscribe to an event name; [`EventBus::publish`] calls every
//! handler registered for that name, in registration order, on the publishing
//! task. A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run. The bus knows nothing about the pipeline and
//! routes purely by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, trace, warn};

pub mod observers;

pub use observers::{LoggingObserver, MetricsObserver, ProgressObserver};

/// Event attributes
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Error type handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by handlers
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Attribute names the pipeline attaches to its events
pub mod attr {
    /// Item category
    pub const CATEGORY: &str = "category";
    /// Item key
    pub const KEY: &str = "key";
    /// Human-readable failure reason
    pub const REASON: &str = "reason";
    /// Attempts made for the item
    pub const ATTEMPTS: &str = "attempts";
    /// Rows in the fetched payload
    pub const ROWS: &str = "rows";
    /// Items that reached terminal success
    pub const SUCCESSFUL_COUNT: &str = "successful_count";
    /// Items that reached terminal failure
    pub const FAILED_COUNT: &str = "failed_count";
    /// Items that reached any terminal state
    pub const PROCESSED_COUNT: &str = "processed_count";
    /// Items ever submitted
    pub const TOTAL_COUNT: &str = "total_count";
    /// Worker count of the publishing pool
    pub const WORKER_COUNT: &str = "worker_count";
    /// Items still queued when a pool finished
    pub const PENDING_COUNT: &str = "pending_count";
    /// Whether a failed item made it into the dead-letter store
    pub const DEAD_LETTER_RECORDED: &str = "dead_letter_recorded";
}

/// Lifecycle events published by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A pool began accepting work
    Started,
    /// Counters changed after an item reached a terminal state
    Progress,
    /// An item reached terminal success
    Succeeded,
    /// An item exhausted its retries
    Failed,
    /// A pool drained or was stopped
    Finished,
}

impl EventKind {
    /// All kinds, in lifecycle order
    pub const ALL: [EventKind; 5] = [
        EventKind::Started,
        EventKind::Progress,
        EventKind::Succeeded,
        EventKind::Failed,
        EventKind::Finished,
    ];

    /// Event name used for routing
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

/// A published event. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Name the event was published under
    pub name: String,
    /// Who published it
    pub sender: String,
    /// Free-form attributes
    pub attributes: Attributes,
    /// Publication time
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// The lifecycle kind, if the name is one of the pipeline's
    pub fn kind(&self) -> Option<EventKind> {
        self.name.parse().ok()
    }

    /// String attribute
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }

    /// Unsigned integer attribute
    pub fn attr_u64(&self, name: &str) -> Option<u64> {
        self.attributes.get(name).and_then(|v| v.as_u64())
    }

    /// Boolean attribute
    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        self.attributes.get(name).and_then(|v| v.as_bool())
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of `event name -> handlers`
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        let counts: HashMap<&str, usize> =
            handlers.iter().map(|(name, list)| (name.as_str(), list.len())).collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_name`.
    pub fn subscribe<F>(&self, event_name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(event = %event_name, "Handler subscribed");
        id
    }

    /// Register `handler` for a lifecycle kind
    pub fn subscribe_kind<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(kind.as_str(), handler)
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of handlers registered for `event_name`
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        handlers.get(event_name).map_or(0, Vec::len)
    }

    /// Publish an event to every handler registered for `event_name`.
    ///
    /// Returns how many handlers completed without error. Publishing a name
    /// nobody subscribed to does nothing.
    pub fn publish(&self, event_name: &str, sender: &str, attributes: Attributes) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
            match handlers.get(event_name) {
                Some(list) if !list.is_empty() => list.iter().map(|(_, h)| h.clone()).collect(),
                _ => return 0,
            }
        };

        let event = Event {
            name: event_name.to_string(),
            sender: sender.to_string(),
            attributes,
            timestamp: Utc::now(),
        };

        let mut delivered = 0;
        for (index, handler) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        event = %event_name,
                        sender = %sender,
                        handler = index,
                        error = %e,
                        "Event handler returned an error"
                    );
                }
                Err(panic) => {
                    error!(
                        event = %event_name,
                        sender = %sender,
                        handler = index,
                        panic = %panic_message(panic.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Publish a lifecycle kind
    pub fn publish_kind(&self, kind: EventKind, sender: &str, attributes: Attributes) -> usize {
        self.publish(kind.as_str(), sender, attributes)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
