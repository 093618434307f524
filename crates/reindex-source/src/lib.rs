//! # reindex-source
//!
//! Reads source rows in cursor order and hands them out as batches.
//!
//! ## Key Components
//!
//! - [`RowSource`]: a table readable "after cursor X, at most N rows"
//! - [`CursorPaginator`]: turns a source into ordered, non-overlapping batches
//! - [`MySqlSource`]: sqlx-backed source for MySQL tables
//! - [`InMemorySource`]: ordered map source for tests and dry runs
//! - [`CategoryRegistry`]: category key to table and row type
//! - [`HighScore`]: the high score row

pub mod error;
pub mod high_score;
pub mod memory;
pub mod mysql;
pub mod paginator;
pub mod registry;
pub mod source;

pub use error::SourceError;
pub use high_score::{mods_from_bitset, HighScore, SCORE_CURSOR_COLUMN};
pub use memory::InMemorySource;
pub use mysql::{connect, MySqlSource};
pub use paginator::CursorPaginator;
pub use registry::{CategoryHandler, CategoryRegistry, HIGH_SCORES_SCHEMA};
pub use source::{RowSource, SourceRow};
