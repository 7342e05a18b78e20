//! Worker pool lifecycle

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, info_span, warn, Instrument};

use super::progress::{CounterSnapshot, DrainReport, PipelineCounters};
use super::queue::WorkQueue;
use super::worker::{WorkerContext, WorkerSettings};
use super::PipelineError;
use crate::config::{ConfigError, PipelineConfig};
use crate::dead_letter::DeadLetterStore;
use crate::events::{attr, EventBus, EventKind};
use crate::rate_limit::RateLimiter;
use crate::shutdown::{ShutdownCoordinator, SharedShutdown};
use crate::sink::{NullSink, ResultSink};
use crate::task::{ProviderClients, TaskBuilder, TaskRegistry};
use crate::WorkItem;

/// Sender name used on events unless overridden
pub const DEFAULT_POOL_NAME: &str = "worker-pool";

/// Configures and starts a [`WorkerPool`]
pub struct WorkerPoolBuilder {
    config: PipelineConfig,
    clients: ProviderClients,
    name: String,
    sink: Option<Arc<dyn ResultSink>>,
    bus: Option<Arc<EventBus>>,
    dead_letters: Option<Arc<DeadLetterStore>>,
    shutdown: Option<SharedShutdown>,
    registry: Option<TaskRegistry>,
    limiter: Option<Arc<RateLimiter>>,
}

impl WorkerPoolBuilder {
    /// Sender name on published events
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Where successful non-empty results go (default: discarded)
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Bus to publish lifecycle events on (default: a private bus)
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Dead-letter store (default: one rooted at `config.dead_letter_dir`)
    pub fn with_dead_letter_store(mut self, store: Arc<DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    /// Share a shutdown coordinator, e.g. one wired to Ctrl+C
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Use this registry instead of `config.templates`
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share a rate limiter across pools instead of building one from the config
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Validate the configuration, spawn the workers and publish `started`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Result<WorkerPool, PipelineError> {
        self.config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| self.config.registry());
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(self.config.rate_limiter()));
        limiter.validate().map_err(ConfigError::Invalid)?;
        let dead_letters = self
            .dead_letters
            .unwrap_or_else(|| Arc::new(DeadLetterStore::new(self.config.dead_letter_dir.clone())));

        let worker_count = self.config.worker_count;
        let ctx = Arc::new(WorkerContext {
            name: self.name,
            queue: Arc::new(WorkQueue::new(self.config.queue_capacity)),
            limiter,
            builder: TaskBuilder::new(Arc::new(registry)),
            clients: self.clients,
            sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
            dead_letters,
            bus: self.bus.unwrap_or_default(),
            counters: Arc::new(PipelineCounters::new()),
            shutdown: self.shutdown.unwrap_or_else(ShutdownCoordinator::shared),
            settings: WorkerSettings {
                max_retries: self.config.max_retries,
                acquire_timeout: self.config.acquire_timeout(),
                fetch_timeout: self.config.fetch_timeout(),
                initial_backoff_ms: self.config.initial_backoff_ms,
                max_backoff_ms: self.config.max_backoff_ms,
            },
            worker_count,
            live_workers: AtomicUsize::new(worker_count),
            workers_exited: Notify::new(),
            finished: AtomicBool::new(false),
        });

        info!(
            pool = %ctx.name,
            workers = worker_count,
            max_retries = ctx.settings.max_retries,
            queue_capacity = ctx.queue.capacity(),
            categories = ctx.builder.registry().len(),
            "Starting worker pool"
        );

        for worker_id in 0..worker_count {
            let span = info_span!("worker", pool = %ctx.name, worker = worker_id);
            tokio::spawn(ctx.clone().run_worker(worker_id).instrument(span));
        }

        let mut attributes = ctx.counters.snapshot().to_attributes();
        attributes.insert(attr::WORKER_COUNT.into(), (worker_count as u64).into());
        ctx.bus.publish_kind(EventKind::Started, &ctx.name, attributes);

        Ok(WorkerPool { ctx })
    }
}

/// A fixed set of async workers draining a shared [`WorkQueue`].
///
/// Items move through `queued → in-flight → (queued again | succeeded | failed)`.
/// Every submitted item ends in exactly one terminal state unless the pool is
/// stopped first, in which case it stays queued and is reported as pending.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.ctx.name)
            .field("workers", &self.ctx.worker_count)
            .field("queued", &self.ctx.queue.len())
            .field("counters", &self.ctx.counters.snapshot())
            .finish()
    }
}

impl WorkerPool {
    /// Start configuring a pool
    pub fn builder(config: PipelineConfig, clients: ProviderClients) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            config,
            clients,
            name: DEFAULT_POOL_NAME.to_string(),
            sink: None,
            bus: None,
            dead_letters: None,
            shutdown: None,
            registry: None,
            limiter: None,
        }
    }

    /// Enqueue one fresh item, waiting while the queue is full.
    ///
    /// # Errors
    /// [`PipelineError::Stopped`] after [`stop`](Self::stop),
    /// [`PipelineError::QueueClosed`] after [`close`](Self::close).
    pub async fn submit(&self, item: WorkItem) -> Result<(), PipelineError> {
        if self.ctx.shutdown.is_shutdown_requested() {
            return Err(PipelineError::Stopped);
        }
        // Counted before it is visible to workers so the barrier never sees
        // more settled items than submitted ones
        self.ctx.counters.add_total();
        self.ctx.finished.store(false, Ordering::SeqCst);
        if let Err(e) = self.ctx.queue.push(item).await {
            self.ctx.counters.retract_total();
            return Err(e.into());
        }
        Ok(())
    }

    /// Enqueue many items in order, stopping at the first error
    pub async fn submit_all<I>(&self, items: I) -> Result<usize, PipelineError>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let mut submitted = 0;
        for item in items {
            self.submit(item).await?;
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Re-submit every key recorded in the dead-letter file for `date`.
    ///
    /// Keys go back in as fresh items with a zero retry count.
    pub async fn redrive(&self, store: &DeadLetterStore, date: &str) -> Result<usize, PipelineError> {
        let entries = store.read(date)?;
        let items = entries.into_iter().flat_map(|(category, keys)| {
            keys.into_iter()
                .map(move |key| WorkItem::new(category.clone(), key))
        });
        let submitted = self.submit_all(items).await?;
        info!(pool = %self.ctx.name, date = %date, submitted, "Re-drove dead letters");
        Ok(submitted)
    }

    /// Stop accepting submissions. Workers finish the queue and then exit.
    pub fn close(&self) {
        self.ctx.queue.close();
    }

    /// Wait until every item submitted so far is terminal, or until the
    /// workers have exited after [`stop`](Self::stop). Publishes `finished`.
    pub async fn join(&self) -> DrainReport {
        tokio::select! {
            _ = self.ctx.counters.wait_drained() => {},
            _ = self.ctx.wait_workers_exited() => {},
        }
        self.ctx.publish_finished();
        self.report()
    }

    /// Stop popping new items. In-flight items finish; queued items stay
    /// queued and are reported as pending.
    ///
    /// With `wait` this returns once every worker has exited. Otherwise it
    /// returns immediately and `finished` is published in the background.
    pub async fn stop(&self, wait: bool) -> Option<DrainReport> {
        info!(pool = %self.ctx.name, wait, "Stopping worker pool");
        self.ctx.shutdown.request_shutdown();

        if wait {
            self.ctx.wait_workers_exited().await;
            self.ctx.publish_finished();
            let report = self.report();
            if report.pending > 0 {
                warn!(pool = %self.ctx.name, pending = report.pending, "Stopped with items still queued");
            }
            Some(report)
        } else {
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                ctx.wait_workers_exited().await;
                ctx.publish_finished();
            });
            None
        }
    }

    /// Submit `items`, close the queue and wait for the drain
    pub async fn run<I>(&self, items: I) -> Result<DrainReport, PipelineError>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let result = self.submit_all(items).await;
        self.close();
        let report = self.join().await;
        result.map(|_| report)
    }

    /// Current counters
    pub fn counters(&self) -> CounterSnapshot {
        self.ctx.counters.snapshot()
    }

    /// Items waiting in the queue
    pub fn queued(&self) -> usize {
        self.ctx.queue.len()
    }

    /// Number of workers started
    pub fn worker_count(&self) -> usize {
        self.ctx.worker_count
    }

    /// Workers still running
    pub fn live_workers(&self) -> usize {
        self.ctx.live_workers.load(Ordering::SeqCst)
    }

    /// Whether [`stop`](Self::stop) has been called or shutdown was requested
    pub fn is_stopped(&self) -> bool {
        self.ctx.shutdown.is_shutdown_requested()
    }

    /// Bus the pool publishes on
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.ctx.bus
    }

    fn report(&self) -> DrainReport {
        DrainReport::new(self.ctx.counters.snapshot(), self.ctx.queue.len())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Idle workers would otherwise wait on the queue forever
        self.ctx.queue.close();
    }
}
