//! Background flushing and pipeline lifecycle.
//!
//! One worker task per pipeline waits on the first of three triggers: the
//! flush interval, a wake signal raised when the queue fills a batch, or the
//! stop signal. Each flush cycle runs in its own task so a panic inside it is
//! logged and the worker keeps going.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use shared::models::Record;

use crate::batch::Batcher;
use crate::error::ClientError;
use crate::queue::BoundedQueue;
use crate::transport::{DeliveryCounters, Transport};

/// Lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No worker is running.
    Stopped,
    /// The worker is flushing in the background.
    Running,
    /// `shutdown` is in progress.
    Stopping,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// What caused a flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The flush interval elapsed.
    Interval,
    /// The queue filled at least one batch.
    Wake,
    /// An explicit `flush` call.
    Manual,
    /// The pipeline is stopping.
    Shutdown,
}

impl FlushTrigger {
    fn full_batches_only(self) -> bool {
        matches!(self, Self::Wake)
    }
}

/// Point-in-time counters for a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records waiting in the queue.
    pub queued: usize,
    /// Records evicted because the queue was full.
    pub dropped: u64,
    /// Records delivered.
    pub delivered_records: u64,
    /// Batches delivered.
    pub delivered_batches: u64,
    /// Batches dropped after a fatal error or exhausted retries.
    pub failed_batches: u64,
    /// Retry attempts made.
    pub retries: u64,
}

/// State shared between producers, the worker and flush callers.
#[derive(Debug)]
struct Shared {
    queue: BoundedQueue<Record>,
    batcher: Batcher,
    transport: Transport,
    /// Held for a whole drain so cycles never interleave batches.
    delivery: tokio::sync::Mutex<()>,
    counters: Arc<DeliveryCounters>,
    wake: Notify,
}

impl Shared {
    /// Delivers queued records batch by batch.
    ///
    /// A wake only ships full batches. Other triggers ship whatever was
    /// queued when the cycle began.
    async fn drain(&self, trigger: FlushTrigger) {
        let _delivering = self.delivery.lock().await;
        let mut budget = self.queue.len();

        while budget > 0 {
            if trigger.full_batches_only() && !self.batcher.is_ready(self.queue.len()) {
                break;
            }
            let Some(batch) = self.batcher.next_batch(&self.queue) else {
                break;
            };
            budget = budget.saturating_sub(batch.len());
            // Failures are already reported by the transport.
            let _ = self.transport.deliver(batch).await;
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: PipelineState,
    stop_tx: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

/// Queue, batcher and transport plus the background worker driving them.
#[derive(Debug)]
pub struct Pipeline {
    shared: Arc<Shared>,
    flush_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
    closed: AtomicBool,
}

impl Pipeline {
    /// Creates a stopped pipeline.
    #[must_use]
    pub fn new(
        transport: Transport,
        batch_size: usize,
        max_queue_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let counters = transport.counters();
        Self {
            shared: Arc::new(Shared {
                queue: BoundedQueue::new(max_queue_size),
                batcher: Batcher::new(batch_size),
                transport,
                delivery: tokio::sync::Mutex::new(()),
                counters,
                wake: Notify::new(),
            }),
            flush_interval,
            lifecycle: Mutex::new(Lifecycle {
                state: PipelineState::Stopped,
                stop_tx: None,
                worker: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queues a record without blocking. Ignored once the pipeline is closed.
    pub fn enqueue(&self, record: Record) {
        if self.is_closed() {
            return;
        }
        let outcome = self.shared.queue.push(record);
        if outcome.evicted {
            tracing::debug!(
                dropped = self.shared.queue.dropped(),
                "Queue full, evicted oldest record"
            );
        }
        if self.shared.batcher.is_ready(outcome.len) {
            self.shared.wake.notify_one();
        }
    }

    /// Spawns the background worker on the current Tokio runtime.
    ///
    /// Does nothing if the worker is already running or the pipeline is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoRuntime`] when called outside a runtime.
    pub fn start(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != PipelineState::Stopped {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = handle.spawn(run_worker(
            Arc::clone(&self.shared),
            stop_rx,
            self.flush_interval,
        ));

        lifecycle.state = PipelineState::Running;
        lifecycle.stop_tx = Some(stop_tx);
        lifecycle.worker = Some(worker);

        tracing::info!(
            batch_size = self.shared.batcher.batch_size(),
            flush_interval_ms = u64::try_from(self.flush_interval.as_millis()).unwrap_or(u64::MAX),
            "Started telemetry worker"
        );
        Ok(())
    }

    /// Delivers every queued record before returning. No-op once closed.
    pub async fn flush(&self) {
        if self.is_closed() {
            return;
        }
        self.shared.drain(FlushTrigger::Manual).await;
    }

    /// Stops the worker, flushes the queue and closes the transport.
    ///
    /// Returns within `timeout`. Flushing and joining the worker share that
    /// budget; when it elapses the worker is aborted, the transport is closed
    /// under any concurrent `flush`, and undelivered records are lost.
    /// Calling `shutdown` again is a no-op.
    pub async fn shutdown(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (stop_tx, mut worker) = {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = PipelineState::Stopping;
            (lifecycle.stop_tx.take(), lifecycle.worker.take())
        };
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(true);
        }

        let finished = tokio::time::timeout(timeout, async {
            if let Some(worker) = worker.as_mut() {
                if let Err(err) = worker.await {
                    tracing::error!(error = %err, "Telemetry worker failed");
                }
            }
            self.shared.drain(FlushTrigger::Shutdown).await;
        })
        .await;

        if finished.is_err() {
            if let Some(worker) = worker {
                worker.abort();
            }
            tracing::warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                remaining = self.shared.queue.len(),
                "Shutdown timed out, flush may be incomplete"
            );
        }

        self.shared.transport.close();
        self.lifecycle().state = PipelineState::Stopped;
        tracing::info!("Stopped telemetry worker");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.lifecycle().state
    }

    /// Returns true once `shutdown` has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Records waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Records evicted because the queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.shared.queue.dropped()
    }

    /// Snapshot of the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let counters = &self.shared.counters;
        PipelineStats {
            queued: self.shared.queue.len(),
            dropped: self.shared.queue.dropped(),
            delivered_records: counters.delivered_records(),
            delivered_batches: counters.delivered_batches(),
            failed_batches: counters.failed_batches(),
            retries: counters.retries(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(stop_tx) = lifecycle.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

/// Aborts the wrapped task when dropped, so cancelling the worker also
/// cancels its in-flight cycle.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_worker(shared: Arc<Shared>, mut stop: watch::Receiver<bool>, flush_interval: Duration) {
    let now = Instant::now();
    // Out of `Instant` range: the timer never fires.
    let first_tick = now
        .checked_add(flush_interval)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30));
    let mut ticker = interval_at(first_tick, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let trigger = tokio::select! {
            _ = ticker.tick() => FlushTrigger::Interval,
            () = shared.wake.notified() => FlushTrigger::Wake,
            _ = stop.changed() => break,
        };

        let cycle_shared = Arc::clone(&shared);
        let mut cycle = AbortOnDrop(tokio::spawn(async move {
            cycle_shared.drain(trigger).await;
        }));
        if let Err(err) = (&mut cycle.0).await {
            if err.is_panic() {
                tracing::error!(?trigger, error = %err, "Flush cycle panicked, continuing");
            }
        }
    }

    shared.drain(FlushTrigger::Shutdown).await;
}
