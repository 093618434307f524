//! Indexing pipeline for the search reindexer.
//!
//! This crate moves batches from a cursor-paginated source into a search
//! sink, records progress so runs can resume, and swaps aliases once a
//! physical index is complete.
//!
//! ## Key Components
//!
//! - [`WorkQueue`]: bounded batch queue with leases and requeue
//! - [`BulkSubmitter`]: bulk dispatch with adaptive throttling
//! - [`CheckpointStore`]: per-index progress, with in-memory,
//!   Elasticsearch and RocksDB backends
//! - [`ProgressTracker`]: contiguous watermark over out-of-order completions
//! - [`IndexLifecycleManager`]: resolves the target index and swaps aliases
//! - [`Orchestrator`]: drives one run, or runs forever in watch mode
//!
//! ## Example
//!
//! ```ignore
//! use reindex_indexing::{Orchestrator, PipelineConfig, RunRequest};
//!
//! let orchestrator = Orchestrator::new(source, sink, checkpoints, schema, alias, config);
//! let summary = orchestrator.run_once(RunRequest::default(), &cancel).await?;
//! println!("{} records/s", summary.throughput());
//! ```

pub mod checkpoint;
pub mod elastic_checkpoint;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod rocks_checkpoint;
pub mod submitter;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use elastic_checkpoint::ElasticCheckpointStore;
pub use error::IndexingError;
pub use lifecycle::{IndexLifecycleManager, Resolution, ResolutionKind};
pub use pipeline::{Orchestrator, PipelineConfig, RunPhase, RunRequest, RunSummary};
pub use progress::ProgressTracker;
pub use queue::{QueueClosed, WorkQueue};
pub use rocks_checkpoint::RocksCheckpointStore;
pub use submitter::{BulkSubmitter, SubmitStats, SubmitterConfig};
