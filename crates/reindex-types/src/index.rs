//! Physical index naming and descriptors.

use serde::{Deserialize, Serialize};

/// A physical index bound (or to be bound) to an alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Concrete index name, e.g. `high_scores_osu_1700000000`
    pub physical_index_name: String,

    /// Public alias readers query
    pub alias_name: String,

    /// Settings and mappings used when the index is created
    pub schema: serde_json::Value,
}

impl IndexDescriptor {
    /// Describe a new physical index for `alias` named with `suffix`.
    pub fn new(alias: &str, suffix: &str, schema: serde_json::Value) -> Self {
        Self {
            physical_index_name: physical_index_name(alias, suffix),
            alias_name: alias.to_string(),
            schema,
        }
    }
}

/// Name of the physical index for `alias` with the given suffix.
pub fn physical_index_name(alias: &str, suffix: &str) -> String {
    format!("{}_{}", alias, suffix)
}

/// Suffix used when the caller doesn't supply one: unix time in seconds.
pub fn timestamp_suffix() -> String {
    chrono::Utc::now().timestamp().to_string()
}
