//! Bulk submission with adaptive throttling.
//!
//! The submitter takes batches off the [`WorkQueue`] and writes each one to
//! the sink as a single bulk request, keeping up to `max_in_flight` requests
//! outstanding. When the sink pushes back (a 429 on any item, or a transport
//! failure) the batch goes back to the tail of the queue and the delay
//! counter grows; every clean response shrinks it again. Before each
//! dispatch the submitter sleeps `delay * delay_step`.
//!
//! Checkpoints advance only to the contiguous watermark of completed batches
//! (see [`ProgressTracker`]). A watermark whose write failed is retried on the
//! next completion and once more before [`BulkSubmitter::run`] returns.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use reindex_sink::{BulkItemOutcome, SearchSink, SinkError};
use reindex_types::{Batch, Checkpoint, Cursor};

use crate::checkpoint::CheckpointStore;
use crate::error::IndexingError;
use crate::progress::ProgressTracker;
use crate::queue::WorkQueue;

/// Configuration for the bulk submitter.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Bulk requests allowed in flight at once
    pub max_in_flight: usize,
    /// Sleep per unit of delay before a dispatch
    pub delay_step: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            delay_step: Duration::from_millis(100),
        }
    }
}

impl SubmitterConfig {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_delay_step(mut self, delay_step: Duration) -> Self {
        self.delay_step = delay_step;
        self
    }
}

/// Counters for one submitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    /// Documents written successfully
    pub records: u64,
    /// Batches completed (each counted once, however often it was retried)
    pub batches: u64,
    /// Dispatches that were pushed back and requeued
    pub retries: u64,
    /// Documents rejected permanently
    pub failed_items: u64,
    /// Adaptive delay when the stats were taken
    pub delay: u32,
}

#[derive(Debug, Default)]
struct Counters {
    records: AtomicU64,
    batches: AtomicU64,
    retries: AtomicU64,
    failed_items: AtomicU64,
}

struct Shared {
    sink: Arc<dyn SearchSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    queue: Arc<WorkQueue>,
    index: String,
    alias: String,
    delay: AtomicU32,
    counters: Counters,
    progress: Mutex<ProgressTracker>,
    /// Highest watermark the checkpoint store has acknowledged
    persisted: Mutex<Option<Cursor>>,
}

/// Writes queued batches to one physical index.
pub struct BulkSubmitter {
    shared: Arc<Shared>,
    config: SubmitterConfig,
}

impl BulkSubmitter {
    pub fn new(
        sink: Arc<dyn SearchSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        queue: Arc<WorkQueue>,
        index: impl Into<String>,
        alias: impl Into<String>,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                checkpoints,
                queue,
                index: index.into(),
                alias: alias.into(),
                delay: AtomicU32::new(0),
                counters: Counters::default(),
                progress: Mutex::new(ProgressTracker::new()),
                persisted: Mutex::new(None),
            }),
            config,
        }
    }

    /// Current value of the adaptive delay counter.
    pub fn delay(&self) -> u32 {
        self.shared.delay.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SubmitStats {
        let c = &self.shared.counters;
        SubmitStats {
            records: c.records.load(Ordering::SeqCst),
            batches: c.batches.load(Ordering::SeqCst),
            retries: c.retries.load(Ordering::SeqCst),
            failed_items: c.failed_items.load(Ordering::SeqCst),
            delay: self.delay(),
        }
    }

    /// Contiguous watermark of completed batches.
    pub fn watermark(&self) -> Option<Cursor> {
        self.shared
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .watermark()
    }

    /// Consume the queue until it reports completion or `cancel` fires.
    ///
    /// In-flight requests are always awaited before returning. A sink error
    /// that retrying can't fix stops the loop and is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<SubmitStats, IndexingError> {
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut in_flight: JoinSet<Result<(), SinkError>> = JoinSet::new();
        let mut fatal: Option<IndexingError> = None;

        info!(
            index = %self.shared.index,
            max_in_flight = self.config.max_in_flight,
            "Bulk submitter started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(index = %self.shared.index, "Bulk submitter cancelled");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = flatten(joined) {
                        fatal = Some(e);
                        break;
                    }
                }
                next = self.next_batch(&permits) => {
                    let Some((batch, permit)) = next else {
                        break;
                    };
                    self.shared
                        .progress
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .register(batch.high_water());
                    in_flight.spawn(dispatch(self.shared.clone(), batch, permit));
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = flatten(joined) {
                fatal.get_or_insert(e);
            }
        }

        if fatal.is_none() {
            if let Err(e) = self.shared.flush().await {
                fatal = Some(e);
            }
        }

        let stats = self.stats();
        match fatal {
            Some(e) => {
                error!(index = %self.shared.index, error = %e, "Bulk submitter stopped");
                Err(e)
            }
            None => {
                info!(
                    index = %self.shared.index,
                    records = stats.records,
                    batches = stats.batches,
                    retries = stats.retries,
                    failed_items = stats.failed_items,
                    "Bulk submitter finished"
                );
                Ok(stats)
            }
        }
    }

    /// Wait for a free slot, apply the throttle delay, then take a batch.
    async fn next_batch(&self, permits: &Arc<Semaphore>) -> Option<(Batch, OwnedSemaphorePermit)> {
        let permit = permits.clone().acquire_owned().await.ok()?;

        let delay = self.delay();
        if delay > 0 {
            debug!(delay, "Throttling before dispatch");
            tokio::time::sleep(self.config.delay_step * delay).await;
        }

        let batch = self.shared.queue.take().await?;
        Some((batch, permit))
    }
}

fn flatten(joined: Result<Result<(), SinkError>, tokio::task::JoinError>) -> Result<(), IndexingError> {
    joined?.map_err(IndexingError::from)
}

async fn dispatch(shared: Arc<Shared>, batch: Batch, _permit: OwnedSemaphorePermit) -> Result<(), SinkError> {
    let high_water = batch.high_water();

    let response = match shared.sink.bulk(&shared.index, batch.records()).await {
        Ok(response) => response,
        Err(e) if e.is_transient() => {
            shared.push_back(batch, &e.to_string());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if response.is_rate_limited() {
        shared.push_back(batch, "rate limited");
        return Ok(());
    }

    for failure in response.failures() {
        if let BulkItemOutcome::Failed { id, status, reason } = failure {
            warn!(index = %shared.index, id = %id, status, reason = %reason, "Document rejected");
        }
    }

    let failed = response.failures().count() as u64;
    shared.counters.failed_items.fetch_add(failed, Ordering::SeqCst);
    shared
        .counters
        .records
        .fetch_add(response.succeeded() as u64, Ordering::SeqCst);
    shared.counters.batches.fetch_add(1, Ordering::SeqCst);
    let _ = shared
        .delay
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));

    shared.complete(high_water).await;
    shared.queue.ack();
    Ok(())
}

impl Shared {
    /// Requeue a batch the sink pushed back on and grow the delay.
    fn push_back(&self, batch: Batch, reason: &str) {
        let delay = self.delay.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.retries.fetch_add(1, Ordering::SeqCst);
        warn!(
            index = %self.index,
            last_cursor = batch.high_water(),
            delay,
            reason = %reason,
            "Sink pushed back, requeued batch"
        );
        self.queue.requeue(batch);
    }

    /// Mark a batch done and persist the watermark if it is ahead of the store.
    async fn complete(&self, high_water: Cursor) {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .complete(high_water);

        if let Err(e) = self.flush().await {
            warn!(index = %self.index, error = %e, "Checkpoint write failed, will retry");
        }
    }

    /// Write the current watermark unless the store already has it.
    async fn flush(&self) -> Result<(), IndexingError> {
        let watermark = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .watermark();
        let Some(watermark) = watermark else {
            return Ok(());
        };

        let persisted = *self.persisted.lock().unwrap_or_else(|e| e.into_inner());
        if persisted.is_some_and(|p| p >= watermark) {
            return Ok(());
        }

        let checkpoint = Checkpoint::new(self.index.as_str(), self.alias.as_str(), watermark);
        self.checkpoints.upsert(&checkpoint).await?;

        let mut persisted = self.persisted.lock().unwrap_or_else(|e| e.into_inner());
        *persisted = (*persisted).max(Some(watermark));
        debug!(index = %self.index, last_cursor = watermark, "Checkpoint advanced");
        Ok(())
    }
}
