//! Durable progress markers.
//!
//! One checkpoint exists per physical index. It records the highest cursor
//! below which everything has been written, and it only moves forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Cursor;

/// Progress marker for one physical index.
///
/// Field names on the wire follow the existing `index_meta` documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Physical index this checkpoint tracks
    #[serde(rename = "index")]
    pub physical_index: String,

    /// Alias the physical index is built for
    pub alias: String,

    /// Highest cursor known to be written
    #[serde(rename = "last_id")]
    pub last_cursor: Cursor,

    /// Time of the last advance
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current time
    pub fn new(physical_index: impl Into<String>, alias: impl Into<String>, last_cursor: Cursor) -> Self {
        Self {
            physical_index: physical_index.into(),
            alias: alias.into(),
            last_cursor,
            updated_at: Utc::now(),
        }
    }

    /// Max-merge another checkpoint for the same index into this one.
    ///
    /// Returns true when `last_cursor` moved forward. A lower or equal
    /// cursor leaves the checkpoint untouched.
    pub fn merge(&mut self, other: &Checkpoint) -> bool {
        if other.last_cursor <= self.last_cursor {
            return false;
        }
        self.last_cursor = other.last_cursor;
        self.updated_at = other.updated_at.max(self.updated_at);
        true
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
