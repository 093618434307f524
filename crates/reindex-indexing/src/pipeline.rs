//! Run orchestration.
//!
//! One run resolves the physical index, streams the source into the work
//! queue while the bulk submitter drains it, waits for every in-flight and
//! requeued batch to land, and finally swaps the alias. Watch mode repeats
//! runs on a timer, resuming each time from the stored checkpoint.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use reindex_sink::SearchSink;
use reindex_source::{CursorPaginator, RowSource};
use reindex_types::{Checkpoint, Cursor, Settings, CURSOR_MIN};

use crate::checkpoint::CheckpointStore;
use crate::error::IndexingError;
use crate::lifecycle::{IndexLifecycleManager, ResolutionKind};
use crate::queue::WorkQueue;
use crate::submitter::{BulkSubmitter, SubmitStats, SubmitterConfig};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Resolving,
    /// Producer and submitter both running
    Producing,
    /// Source exhausted; waiting for queued and in-flight batches
    Draining,
    Swapping,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Resolving => "resolving",
            RunPhase::Producing => "producing",
            RunPhase::Draining => "draining",
            RunPhase::Swapping => "swapping",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Configuration for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rows per source query and per bulk request
    pub chunk_size: usize,
    /// Produced batches held in memory at once
    pub queue_size: usize,
    /// Bulk requests in flight at once
    pub max_in_flight: usize,
    /// Unit of the throttle and drain-poll delays
    pub delay_step: Duration,
    /// Pause between watch mode cycles
    pub polling_interval: Duration,
    /// Upper bound for one drain-poll sleep
    pub max_drain_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            queue_size: 5,
            max_in_flight: 4,
            delay_step: Duration::from_millis(100),
            polling_interval: Duration::from_secs(10),
            max_drain_wait: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            queue_size: settings.queue_size,
            max_in_flight: settings.max_in_flight,
            delay_step: settings.delay_step(),
            polling_interval: settings.polling_interval(),
            ..Default::default()
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_delay_step(mut self, step: Duration) -> Self {
        self.delay_step = step;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    fn submitter(&self) -> SubmitterConfig {
        SubmitterConfig::default()
            .with_max_in_flight(self.max_in_flight)
            .with_delay_step(self.delay_step)
    }
}

/// Per-run options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Start after this cursor instead of the stored checkpoint
    pub resume_from: Option<Cursor>,
    /// Build into a new physical index even if one could be reused
    pub force_new: bool,
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub alias: String,
    pub index: String,
    pub resolution: ResolutionKind,
    /// Exclusive lower bound the run started from
    pub resumed_from: Option<Cursor>,
    /// Records read from the source
    pub produced: u64,
    pub stats: SubmitStats,
    pub elapsed: Duration,
    /// Stored checkpoint after the run
    pub last_cursor: Option<Cursor>,
}

impl RunSummary {
    /// Records written per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.records as f64 / secs
        } else {
            0.0
        }
    }
}

/// Drives runs for one alias.
pub struct Orchestrator {
    source: Arc<dyn RowSource>,
    sink: Arc<dyn SearchSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    lifecycle: IndexLifecycleManager,
    alias: String,
    suffix: Option<String>,
    config: PipelineConfig,
    phase: watch::Sender<RunPhase>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn RowSource>,
        sink: Arc<dyn SearchSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        schema: Value,
        alias: impl Into<String>,
        config: PipelineConfig,
    ) -> Self {
        let lifecycle = IndexLifecycleManager::new(sink.clone(), checkpoints.clone(), schema);
        let (phase, _) = watch::channel(RunPhase::Idle);

        Self {
            source,
            sink,
            checkpoints,
            lifecycle,
            alias: alias.into(),
            suffix: None,
            config,
            phase,
        }
    }

    /// Suffix for newly created physical indices (default: unix timestamp).
    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Observe phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: RunPhase) {
        self.phase.send_replace(phase);
    }

    /// Run once: resolve, index, drain, swap.
    pub async fn run_once(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, IndexingError> {
        let result = self.run_inner(request, cancel).await;
        if result.is_err() {
            self.set_phase(RunPhase::Failed);
        }
        result
    }

    async fn run_inner(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, IndexingError> {
        self.set_phase(RunPhase::Resolving);
        let resolution = self
            .lifecycle
            .resolve_or_create(&self.alias, self.suffix.as_deref(), request.force_new)
            .await?;
        let index = resolution.index.clone();

        if resolution.kind == ResolutionKind::Created {
            // Track the index from the start so it resolves even before its first write.
            let start = request.resume_from.unwrap_or(CURSOR_MIN);
            self.checkpoints
                .upsert(&Checkpoint::new(index.as_str(), self.alias.as_str(), start))
                .await?;
        }

        let stored = self.checkpoints.get_by_index_name(&index).await?;
        let resume_from = request
            .resume_from
            .or(stored.map(|c| c.last_cursor))
            .filter(|cursor| *cursor != CURSOR_MIN);

        info!(
            alias = %self.alias,
            index = %index,
            resolution = %resolution.kind,
            chunk_size = self.config.chunk_size,
            resume_from = ?resume_from,
            "Starting run"
        );

        let started = Instant::now();
        self.set_phase(RunPhase::Producing);

        let queue = Arc::new(WorkQueue::new(self.config.queue_size));
        let submitter = Arc::new(BulkSubmitter::new(
            self.sink.clone(),
            self.checkpoints.clone(),
            queue.clone(),
            index.as_str(),
            self.alias.as_str(),
            self.config.submitter(),
        ));

        // Cancelled by the caller, by a failed producer or by a failed submitter.
        let run_token = cancel.child_token();
        let consumer = {
            let submitter = submitter.clone();
            let token = run_token.clone();
            tokio::spawn(async move {
                let result = submitter.run(token.clone()).await;
                if result.is_err() {
                    token.cancel();
                }
                result
            })
        };

        let paginator = CursorPaginator::new(self.source.clone(), self.config.chunk_size, resume_from);
        let producer = tokio::spawn(produce(paginator, queue.clone(), run_token.clone()));

        let produced = match producer.await.map_err(IndexingError::from).and_then(|r| r) {
            Ok(produced) => produced,
            Err(e) => {
                run_token.cancel();
                queue.close();
                let consumed = consumer.await.map_err(IndexingError::from).and_then(|r| r);

                // A producer stopped by a failing submitter reports the submitter's error.
                let e = match (e, consumed) {
                    (IndexingError::Cancelled, Err(consumer_err)) => consumer_err,
                    (e, _) => e,
                };
                if !matches!(e, IndexingError::Cancelled) {
                    error!(alias = %self.alias, index = %index, error = %e, "Run failed");
                }
                return Err(e);
            }
        };

        queue.close();
        self.set_phase(RunPhase::Draining);
        self.drain(&queue, &submitter, &consumer, &run_token).await;

        let stats = consumer.await??;
        if cancel.is_cancelled() {
            info!(alias = %self.alias, index = %index, "Run cancelled before swap");
            return Err(IndexingError::Cancelled);
        }

        self.set_phase(RunPhase::Swapping);
        self.lifecycle.swap_alias(&self.alias, &index).await?;

        let last_cursor = self
            .checkpoints
            .get_by_index_name(&index)
            .await?
            .map(|c| c.last_cursor);

        let summary = RunSummary {
            alias: self.alias.clone(),
            index,
            resolution: resolution.kind,
            resumed_from: resume_from,
            produced,
            stats,
            elapsed: started.elapsed(),
            last_cursor,
        };

        info!(
            alias = %summary.alias,
            index = %summary.index,
            records = summary.stats.records,
            failed_items = summary.stats.failed_items,
            retries = summary.stats.retries,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            records_per_sec = summary.throughput(),
            last_cursor = ?summary.last_cursor,
            "Run complete"
        );

        self.set_phase(RunPhase::Done);
        Ok(summary)
    }

    /// Poll until the queue is empty and nothing is in flight.
    ///
    /// The interval grows with the backlog and the throttle delay, capped at
    /// `max_drain_wait`.
    async fn drain(
        &self,
        queue: &WorkQueue,
        submitter: &BulkSubmitter,
        consumer: &tokio::task::JoinHandle<Result<SubmitStats, IndexingError>>,
        cancel: &CancellationToken,
    ) {
        loop {
            let backlog = queue.backlog();
            if backlog == 0 || consumer.is_finished() {
                return;
            }

            let units = backlog.max(submitter.delay() as usize) as u32;
            let wait = (self.config.delay_step * units).min(self.config.max_drain_wait);
            info!(
                queued = queue.len(),
                backlog,
                delay = submitter.delay(),
                wait_ms = wait.as_millis() as u64,
                "Waiting for queues to empty"
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Run forever, one cycle every `polling_interval`, until cancelled.
    ///
    /// `first` only applies to the first cycle; later cycles resume from the
    /// stored checkpoint of whatever index resolution picks. A failed cycle is
    /// logged and retried on the next poll. Only an ambiguous index state ends
    /// the loop with an error.
    pub async fn watch(
        &self,
        first: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<(), IndexingError> {
        let mut request = first;
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            match self.run_once(request, cancel).await {
                Ok(summary) => info!(
                    alias = %self.alias,
                    cycle,
                    records = summary.stats.records,
                    last_cursor = ?summary.last_cursor,
                    "Watch cycle complete"
                ),
                Err(IndexingError::Cancelled) => return Ok(()),
                Err(e @ IndexingError::AmbiguousIndex(_)) => return Err(e),
                Err(e) => error!(
                    alias = %self.alias,
                    cycle,
                    error = %e,
                    "Watch cycle failed, retrying after polling interval"
                ),
            }

            request = RunRequest::default();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.polling_interval) => {}
            }
        }
    }
}

/// Feed the queue from the paginator. Returns the number of records read.
async fn produce(
    paginator: CursorPaginator,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) -> Result<u64, IndexingError> {
    let batches = paginator.into_stream();
    futures::pin_mut!(batches);
    let mut produced = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IndexingError::Cancelled),
            next = batches.try_next() => next?,
        };
        let Some(batch) = next else {
            break;
        };

        let count = batch.len() as u64;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IndexingError::Cancelled),
            put = queue.put(batch) => put.map_err(|_| IndexingError::Cancelled)?,
        }
        produced += count;
    }

    info!(produced, "Source exhausted");
    Ok(produced)
}
