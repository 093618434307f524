//! The search sink abstraction.
//!
//! A sink stores documents in physical indices and serves them to readers
//! through aliases. Bulk writes report one [`BulkItemOutcome`] per record so
//! callers can tell overload (retry later) from a rejected document.

use async_trait::async_trait;
use serde_json::{json, Value};

use reindex_types::Record;

use crate::error::SinkError;

/// HTTP status used by the cluster to signal overload.
pub const RATE_LIMITED_STATUS: u16 = 429;

/// Outcome of one item of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkItemOutcome {
    Success { id: String },
    /// Rejected because the cluster is overloaded; retrying may succeed
    RateLimited { id: String },
    /// Rejected for any other reason; retrying won't help
    Failed {
        id: String,
        status: u16,
        reason: String,
    },
}

impl BulkItemOutcome {
    /// Classify an item by its HTTP status.
    pub fn from_status(id: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        let id = id.into();
        match status {
            200..=299 => BulkItemOutcome::Success { id },
            RATE_LIMITED_STATUS => BulkItemOutcome::RateLimited { id },
            _ => BulkItemOutcome::Failed {
                id,
                status,
                reason: reason.into(),
            },
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BulkItemOutcome::Success { id }
            | BulkItemOutcome::RateLimited { id }
            | BulkItemOutcome::Failed { id, .. } => id,
        }
    }
}

/// Per-item results of one bulk write, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<BulkItemOutcome>,
}

impl BulkResponse {
    pub fn new(items: Vec<BulkItemOutcome>) -> Self {
        Self { items }
    }

    /// Response for a request the cluster refused as a whole with a 429.
    pub fn all_rate_limited(records: &[Record]) -> Self {
        Self::new(
            records
                .iter()
                .map(|r| BulkItemOutcome::RateLimited { id: r.id.clone() })
                .collect(),
        )
    }

    /// True if any item was rate limited.
    pub fn is_rate_limited(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, BulkItemOutcome::RateLimited { .. }))
    }

    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, BulkItemOutcome::Success { .. }))
            .count()
    }

    /// Items that failed permanently.
    pub fn failures(&self) -> impl Iterator<Item = &BulkItemOutcome> {
        self.items
            .iter()
            .filter(|item| matches!(item, BulkItemOutcome::Failed { .. }))
    }
}

/// One step of an atomic alias update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Add {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }

    /// Body of this action inside a `_aliases` request.
    pub fn to_json(&self) -> Value {
        match self {
            AliasAction::Add { index, alias } => json!({ "add": { "index": index, "alias": alias } }),
            AliasAction::Remove { index, alias } => {
                json!({ "remove": { "index": index, "alias": alias } })
            }
        }
    }
}

/// A search cluster that documents are indexed into.
#[async_trait]
pub trait SearchSink: Send + Sync {
    /// Index `records` into `index` as one bulk request.
    ///
    /// Returns `Err` only when the request as a whole failed; per-document
    /// problems are reported in the response.
    async fn bulk(&self, index: &str, records: &[Record]) -> Result<BulkResponse, SinkError>;

    /// Create a physical index from a settings/mappings document.
    async fn create_index(&self, index: &str, schema: &Value) -> Result<(), SinkError>;

    /// Physical indices the alias currently points to (empty if none).
    async fn indices_for_alias(&self, alias: &str) -> Result<Vec<String>, SinkError>;

    /// Apply all actions atomically.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SinkError>;
}
