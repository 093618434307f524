//! Source records and ordered batches.
//!
//! A [`Record`] is one source row reduced to what the pipeline needs to move
//! it: its cursor value, its document id and the document body. A [`Batch`]
//! is a non-empty run of records with strictly increasing cursors.

use serde::{Deserialize, Serialize};

use crate::error::ReindexError;

/// Cursor value taken from the designated cursor column.
pub type Cursor = i64;

/// Lowest possible cursor; a paginator started from here performs a full scan.
pub const CURSOR_MIN: Cursor = i64::MIN;

/// One source row, ready to be written to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Ordering value from the cursor column
    pub cursor: Cursor,

    /// Stable document id derived from the natural key
    pub id: String,

    /// Document body sent to the sink
    pub document: serde_json::Value,
}

impl Record {
    /// Create a new record
    pub fn new(cursor: Cursor, id: impl Into<String>, document: serde_json::Value) -> Self {
        Self {
            cursor,
            id: id.into(),
            document,
        }
    }
}

/// An ordered, non-empty chunk of records.
///
/// Cursors within a batch are strictly increasing, so the last record
/// carries the batch's high-water cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    /// Build a batch, rejecting empty or non-increasing input.
    pub fn new(records: Vec<Record>) -> Result<Self, ReindexError> {
        if records.is_empty() {
            return Err(ReindexError::InvalidInput("batch must not be empty".to_string()));
        }

        if let Some(pair) = records.windows(2).find(|w| w[0].cursor >= w[1].cursor) {
            return Err(ReindexError::InvalidInput(format!(
                "batch cursors must be strictly increasing ({} followed by {})",
                pair[0].cursor, pair[1].cursor
            )));
        }

        Ok(Self { records })
    }

    /// Cursor of the first record.
    pub fn first_cursor(&self) -> Cursor {
        self.records[0].cursor
    }

    /// Cursor of the last record.
    pub fn high_water(&self) -> Cursor {
        self.records[self.records.len() - 1].cursor
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Batches are never empty, so this is always false.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Cursor values in order.
    pub fn cursors(&self) -> Vec<Cursor> {
        self.records.iter().map(|r| r.cursor).collect()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
