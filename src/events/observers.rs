//! Stock observers: structured logging, metrics and a terminal progress bar
//!
//! Observers only read events. None of them can slow the pipeline down beyond
//! the cost of their own handler.

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use super::{attr, Event, EventBus, EventKind, HandlerResult};
use crate::metrics;

/// Logs every lifecycle event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl LoggingObserver {
    /// Subscribe to every lifecycle event
    pub fn attach(self, bus: &EventBus) {
        for kind in EventKind::ALL {
            bus.subscribe_kind(kind, move |event| {
                Self::log(kind, event);
                Ok(())
            });
        }
    }

    fn log(kind: EventKind, event: &Event) {
        let category = event.attr_str(attr::CATEGORY).unwrap_or("");
        let key = event.attr_str(attr::KEY).unwrap_or("");
        let processed = event.attr_u64(attr::PROCESSED_COUNT).unwrap_or(0);
        let total = event.attr_u64(attr::TOTAL_COUNT).unwrap_or(0);

        match kind {
            EventKind::Started => info!(
                sender = %event.sender,
                workers = event.attr_u64(attr::WORKER_COUNT).unwrap_or(0),
                "Pipeline started"
            ),
            EventKind::Progress => info!(
                sender = %event.sender,
                processed,
                total,
                "[PROGRESS] {processed}/{total} items processed"
            ),
            EventKind::Succeeded => info!(
                category = %category,
                key = %key,
                rows = event.attr_u64(attr::ROWS).unwrap_or(0),
                "Item succeeded"
            ),
            EventKind::Failed => error!(
                category = %category,
                key = %key,
                attempts = event.attr_u64(attr::ATTEMPTS).unwrap_or(0),
                reason = %event.attr_str(attr::REASON).unwrap_or("unknown"),
                dead_letter_recorded = event.attr_bool(attr::DEAD_LETTER_RECORDED).unwrap_or(false),
                "Item failed permanently"
            ),
            EventKind::Finished => {
                let failed = event.attr_u64(attr::FAILED_COUNT).unwrap_or(0);
                if failed > 0 {
                    warn!(sender = %event.sender, processed, total, failed, "Pipeline finished with failures");
                } else {
                    info!(sender = %event.sender, processed, total, "Pipeline finished");
                }
            }
        }
    }
}

/// Maps terminal events onto `metrics` counters
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl MetricsObserver {
    /// Subscribe to `succeeded` and `failed`
    pub fn attach(self, bus: &EventBus) {
        bus.subscribe_kind(EventKind::Succeeded, |event| {
            let category = event.attr_str(attr::CATEGORY).unwrap_or("");
            let empty = event.attr_u64(attr::ROWS).unwrap_or(0) == 0;
            metrics::record_item_succeeded(category, empty);
            Ok(())
        });
        bus.subscribe_kind(EventKind::Failed, |event| {
            metrics::record_item_failed(event.attr_str(attr::CATEGORY).unwrap_or(""));
            Ok(())
        });
    }
}

/// Drives an `indicatif` progress bar from `started`/`progress`/`finished`
#[derive(Debug, Clone)]
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver {
    /// Progress bar drawn on stderr
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    /// Progress bar that never draws (tests, non-interactive runs)
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// The underlying bar
    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    /// Subscribe to the events that move the bar
    pub fn attach(&self, bus: &EventBus) {
        let bar = self.bar.clone();
        bus.subscribe_kind(EventKind::Started, move |event| {
            bar.set_length(event.attr_u64(attr::TOTAL_COUNT).unwrap_or(0));
            bar.set_message("starting");
            Ok(())
        });

        let bar = self.bar.clone();
        bus.subscribe_kind(EventKind::Progress, move |event| Self::advance(&bar, event));

        let bar = self.bar.clone();
        bus.subscribe_kind(EventKind::Finished, move |event| {
            Self::advance(&bar, event)?;
            bar.finish_with_message("done");
            Ok(())
        });
    }

    fn advance(bar: &ProgressBar, event: &Event) -> HandlerResult {
        let total = event.attr_u64(attr::TOTAL_COUNT).unwrap_or(0);
        let processed = event.attr_u64(attr::PROCESSED_COUNT).unwrap_or(0);
        let failed = event.attr_u64(attr::FAILED_COUNT).unwrap_or(0);
        if total > bar.length().unwrap_or(0) {
            bar.set_length(total);
        }
        bar.set_position(processed);
        bar.set_message(format!("{failed} failed"));
        Ok(())
    }
}
