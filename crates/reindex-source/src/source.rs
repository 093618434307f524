//! Source traits.
//!
//! A [`RowSource`] answers one question: "give me up to `limit` records whose
//! cursor is strictly greater than `after`, in ascending cursor order".
//! [`SourceRow`] is implemented by typed rows so they can be turned into
//! records without the pipeline knowing their schema.

use async_trait::async_trait;
use serde::Serialize;

use reindex_types::{Cursor, Record};

use crate::error::SourceError;

/// A relational table readable in cursor order.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Fetch the next rows after `after`, ascending, at most `limit`.
    ///
    /// An empty result means the source is exhausted.
    async fn fetch_after(&self, after: Cursor, limit: usize) -> Result<Vec<Record>, SourceError>;

    /// Name of this source for logging.
    fn name(&self) -> &str;
}

/// A typed row that knows its cursor and document id.
pub trait SourceRow: Serialize {
    /// Value of the cursor column. Fails when it doesn't fit a [`Cursor`].
    fn cursor(&self) -> Result<Cursor, SourceError>;

    /// Stable document id derived from the natural key
    fn document_id(&self) -> String;

    /// Convert into a record whose document is the row's serde form.
    fn to_record(&self) -> Result<Record, SourceError> {
        Ok(Record::new(
            self.cursor()?,
            self.document_id(),
            serde_json::to_value(self)?,
        ))
    }
}
