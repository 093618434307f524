//! # reindex-sink
//!
//! Where documents end up: physical indices behind aliases.
//!
//! - [`SearchSink`]: bulk writes, index creation and alias management
//! - [`BulkItemOutcome`]: per-document result (`Success | RateLimited | Failed`)
//! - [`ElasticsearchClient`]: the REST implementation
//! - [`InMemorySink`]: in-process implementation with fault injection

pub mod elasticsearch;
pub mod error;
pub mod memory;
pub mod sink;

pub use elasticsearch::ElasticsearchClient;
pub use error::SinkError;
pub use memory::InMemorySink;
pub use sink::{AliasAction, BulkItemOutcome, BulkResponse, SearchSink, RATE_LIMITED_STATUS};
