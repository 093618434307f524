//! Physical index resolution and alias swaps.
//!
//! Readers only ever query an alias. A run writes into a physical index and,
//! once everything is written, repoints the alias in one atomic request.
//! Which physical index a run writes into is decided from two facts: what
//! the alias currently points to, and which indices have checkpoint history
//! under that alias.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use reindex_sink::{AliasAction, SearchSink};
use reindex_types::{timestamp_suffix, IndexDescriptor};

use crate::checkpoint::CheckpointStore;
use crate::error::IndexingError;

/// How the target index was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// Currently aliased and tracked; likely resuming after a completed run
    Aliased,
    /// Tracked but not aliased; likely resuming an interrupted run
    Unaliased,
    /// Newly created
    Created,
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionKind::Aliased => write!(f, "aliased"),
            ResolutionKind::Unaliased => write!(f, "unaliased"),
            ResolutionKind::Created => write!(f, "created"),
        }
    }
}

/// The physical index a run writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub index: String,
    pub kind: ResolutionKind,
}

/// Finds or creates physical indices and repoints aliases.
pub struct IndexLifecycleManager {
    sink: Arc<dyn SearchSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    schema: Value,
}

impl IndexLifecycleManager {
    /// `schema` is the settings/mappings body used for new indices.
    pub fn new(sink: Arc<dyn SearchSink>, checkpoints: Arc<dyn CheckpointStore>, schema: Value) -> Self {
        Self {
            sink,
            checkpoints,
            schema,
        }
    }

    /// Pick the physical index to write into for `alias`.
    ///
    /// 1. an index aliased to `alias` with checkpoint history is reused;
    /// 2. otherwise a single tracked index is reused;
    /// 3. otherwise `{alias}_{suffix}` is created.
    ///
    /// `force_new` goes straight to creation. Any state that doesn't match
    /// one of the cases is refused with [`IndexingError::AmbiguousIndex`].
    pub async fn resolve_or_create(
        &self,
        alias: &str,
        suffix: Option<&str>,
        force_new: bool,
    ) -> Result<Resolution, IndexingError> {
        info!(alias = %alias, force_new, "Finding index");

        if force_new {
            return self.create(alias, suffix).await;
        }

        let tracked: BTreeSet<String> = self
            .checkpoints
            .get_by_alias(alias)
            .await?
            .into_iter()
            .map(|c| c.physical_index)
            .collect();
        let aliased = self.sink.indices_for_alias(alias).await?;

        let aliased_tracked: Vec<&String> =
            aliased.iter().filter(|index| tracked.contains(*index)).collect();

        match aliased_tracked.as_slice() {
            [index] => {
                info!(alias = %alias, index = %index, "Found matching aliased index");
                return Ok(Resolution {
                    index: (*index).clone(),
                    kind: ResolutionKind::Aliased,
                });
            }
            [] => {}
            several => {
                return Err(IndexingError::AmbiguousIndex(format!(
                    "{} is aliased to several tracked indices: {:?}",
                    alias, several
                )));
            }
        }

        if !aliased.is_empty() {
            return Err(IndexingError::AmbiguousIndex(format!(
                "{} points to {:?}, which has no checkpoint history",
                alias, aliased
            )));
        }

        let candidates: Vec<&String> = tracked.iter().collect();
        match candidates.as_slice() {
            [index] => {
                info!(alias = %alias, index = %index, "Found previous index");
                Ok(Resolution {
                    index: (*index).clone(),
                    kind: ResolutionKind::Unaliased,
                })
            }
            [] => self.create(alias, suffix).await,
            several => Err(IndexingError::AmbiguousIndex(format!(
                "{} has several unaliased tracked indices: {:?}",
                alias, several
            ))),
        }
    }

    async fn create(&self, alias: &str, suffix: Option<&str>) -> Result<Resolution, IndexingError> {
        let suffix = suffix.map(str::to_string).unwrap_or_else(timestamp_suffix);
        let descriptor = IndexDescriptor::new(alias, &suffix, self.schema.clone());

        info!(alias = %alias, index = %descriptor.physical_index_name, "Creating index");
        self.sink
            .create_index(&descriptor.physical_index_name, &descriptor.schema)
            .await?;

        Ok(Resolution {
            index: descriptor.physical_index_name,
            kind: ResolutionKind::Created,
        })
    }

    /// Point `alias` at `index` only, in one atomic request.
    ///
    /// Returns the indices the alias was taken from. They are left in place.
    pub async fn swap_alias(&self, alias: &str, index: &str) -> Result<Vec<String>, IndexingError> {
        let current = self.sink.indices_for_alias(alias).await?;
        if current.len() == 1 && current[0] == index {
            info!(alias = %alias, index = %index, "Alias already points to index");
            return Ok(Vec::new());
        }

        let previous: Vec<String> = current.into_iter().filter(|i| i != index).collect();
        let mut actions: Vec<AliasAction> = previous
            .iter()
            .map(|old| AliasAction::remove(old.as_str(), alias))
            .collect();
        actions.push(AliasAction::add(index, alias));

        info!(alias = %alias, index = %index, previous = ?previous, "Updating alias");
        self.sink.update_aliases(&actions).await?;

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use reindex_sink::InMemorySink;
    use reindex_types::Checkpoint;
    use serde_json::json;

    const ALIAS: &str = "high_scores_osu";

    struct Fixture {
        sink: Arc<InMemorySink>,
        checkpoints: Arc<InMemoryCheckpointStore>,
        manager: IndexLifecycleManager,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(InMemorySink::new());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let manager = IndexLifecycleManager::new(
            sink.clone(),
            checkpoints.clone(),
            json!({ "mappings": { "dynamic": false } }),
        );
        Fixture {
            sink,
            checkpoints,
            manager,
        }
    }

    impl Fixture {
        async fn index(&self, name: &str, aliased: bool, tracked: bool) {
            self.sink.create_index(name, &json!({})).await.unwrap();
            if aliased {
                self.sink
                    .update_aliases(&[AliasAction::add(name, ALIAS)])
                    .await
                    .unwrap();
            }
            if tracked {
                self.checkpoints
                    .upsert(&Checkpoint::new(name, ALIAS, 10))
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_aliased_and_tracked_is_reused() {
        let f = fixture();
        f.index("high_scores_osu_1", true, true).await;

        let resolution = f.manager.resolve_or_create(ALIAS, None, false).await.unwrap();
        assert_eq!(resolution.index, "high_scores_osu_1");
        assert_eq!(resolution.kind, ResolutionKind::Aliased);
    }

    #[tokio::test]
    async fn test_aliased_wins_over_unaliased_tracked() {
        let f = fixture();
        f.index("high_scores_osu_1", true, true).await;
        f.index("high_scores_osu_2", false, true).await;

        let resolution = f.manager.resolve_or_create(ALIAS, None, false).await.unwrap();
        assert_eq!(resolution.index, "high_scores_osu_1");
    }

    #[tokio::test]
    async fn test_tracked_unaliased_is_reused() {
        let f = fixture();
        f.index("high_scores_osu_1", false, true).await;

        let resolution = f.manager.resolve_or_create(ALIAS, None, false).await.unwrap();
        assert_eq!(resolution.index, "high_scores_osu_1");
        assert_eq!(resolution.kind, ResolutionKind::Unaliased);
    }

    #[tokio::test]
    async fn test_nothing_creates_with_suffix() {
        let f = fixture();

        let resolution = f
            .manager
            .resolve_or_create(ALIAS, Some("20180301"), false)
            .await
            .unwrap();
        assert_eq!(resolution.index, "high_scores_osu_20180301");
        assert_eq!(resolution.kind, ResolutionKind::Created);
        assert_eq!(
            f.sink.schema("high_scores_osu_20180301"),
            Some(json!({ "mappings": { "dynamic": false } }))
        );
    }

    #[tokio::test]
    async fn test_default_suffix_is_timestamp() {
        let f = fixture();
        let before = chrono::Utc::now().timestamp();

        let resolution = f.manager.resolve_or_create(ALIAS, None, false).await.unwrap();
        let suffix: i64 = resolution
            .index
            .strip_prefix("high_scores_osu_")
            .unwrap()
            .parse()
            .unwrap();
        assert!(suffix >= before);
    }

    #[tokio::test]
    async fn test_force_new_skips_resolution() {
        let f = fixture();
        f.index("high_scores_osu_1", true, true).await;

        let resolution = f
            .manager
            .resolve_or_create(ALIAS, Some("2"), true)
            .await
            .unwrap();
        assert_eq!(resolution.index, "high_scores_osu_2");
        assert_eq!(resolution.kind, ResolutionKind::Created);
    }

    #[tokio::test]
    async fn test_aliased_but_untracked_is_ambiguous() {
        let f = fixture();
        f.index("high_scores_osu_1", true, false).await;

        let err = f.manager.resolve_or_create(ALIAS, None, false).await.unwrap_err();
        assert!(matches!(err, IndexingError::AmbiguousIndex(_)));
    }

    #[tokio::test]
    async fn test_several_candidates_are_ambiguous() {
        let f = fixture();
        f.index("high_scores_osu_1", false, true).await;
        f.index("high_scores_osu_2", false, true).await;
        assert!(matches!(
            f.manager.resolve_or_create(ALIAS, None, false).await,
            Err(IndexingError::AmbiguousIndex(_))
        ));

        let f = fixture();
        f.index("high_scores_osu_1", true, true).await;
        f.index("high_scores_osu_2", true, true).await;
        assert!(matches!(
            f.manager.resolve_or_create(ALIAS, None, false).await,
            Err(IndexingError::AmbiguousIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_swap_alias() {
        let f = fixture();
        f.index("high_scores_osu_1", true, true).await;
        f.index("high_scores_osu_2", true, false).await;
        f.index("high_scores_osu_3", false, true).await;

        let previous = f.manager.swap_alias(ALIAS, "high_scores_osu_3").await.unwrap();
        assert_eq!(previous, vec!["high_scores_osu_1", "high_scores_osu_2"]);
        assert_eq!(
            f.sink.indices_for_alias(ALIAS).await.unwrap(),
            vec!["high_scores_osu_3"]
        );
        // Superseded indices stay around.
        assert_eq!(f.sink.indices().len(), 3);

        let previous = f.manager.swap_alias(ALIAS, "high_scores_osu_3").await.unwrap();
        assert!(previous.is_empty());
    }
}
