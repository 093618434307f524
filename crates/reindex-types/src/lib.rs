//! # reindex-types
//!
//! Shared domain types for the search reindexer.
//!
//! - [`Record`] / [`Batch`]: rows read from the source, in cursor order
//! - [`Checkpoint`]: durable progress marker per physical index
//! - [`IndexDescriptor`]: a physical index and the alias it serves
//! - [`Settings`]: layered configuration

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod index;
pub mod record;

pub use checkpoint::Checkpoint;
pub use config::{
    CheckpointBackend, CheckpointSettings, ElasticsearchSettings, Settings, VALID_MODES,
};
pub use error::ReindexError;
pub use index::{physical_index_name, timestamp_suffix, IndexDescriptor};
pub use record::{Batch, Cursor, Record, CURSOR_MIN};
