//! End-to-end test infrastructure for the reindexer.
//!
//! Provides a shared TestHarness that wires an in-memory source, sink and
//! checkpoint store into orchestrators, plus helpers for building rows and
//! waiting on asynchronous progress.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use reindex_indexing::{CheckpointStore, InMemoryCheckpointStore, Orchestrator, PipelineConfig};
use reindex_sink::InMemorySink;
use reindex_source::{HighScore, InMemorySource};
use reindex_types::Cursor;

/// Alias every scenario indexes into.
pub const ALIAS: &str = "high_scores_osu";

/// Small chunks and a one-slot queue, so every scenario exercises
/// backpressure and several bulk requests.
pub fn test_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_chunk_size(2)
        .with_queue_size(1)
        .with_delay_step(Duration::from_millis(1))
        .with_polling_interval(Duration::from_millis(20))
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    pub source: Arc<InMemorySource>,
    pub sink: Arc<InMemorySink>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub config: PipelineConfig,
}

impl TestHarness {
    /// Harness over a source holding `cursors`, with in-memory checkpoints.
    pub fn new(cursors: impl IntoIterator<Item = Cursor>) -> Self {
        Self::with_checkpoints(cursors, Arc::new(InMemoryCheckpointStore::new()))
    }

    /// Harness with a caller-supplied checkpoint store.
    pub fn with_checkpoints(
        cursors: impl IntoIterator<Item = Cursor>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            source: Arc::new(InMemorySource::with_cursors("osu_scores_high", cursors)),
            sink: Arc::new(InMemorySink::new()),
            checkpoints,
            config: test_config(),
        }
    }

    /// Swap in a new source, keeping sink and checkpoints.
    pub fn replace_source(&mut self, source: InMemorySource) -> Arc<InMemorySource> {
        self.source = Arc::new(source);
        self.source.clone()
    }

    /// Orchestrator for [`ALIAS`] that names new indices `{ALIAS}_{suffix}`.
    pub fn orchestrator(&self, suffix: &str) -> Orchestrator {
        Orchestrator::new(
            self.source.clone(),
            self.sink.clone(),
            self.checkpoints.clone(),
            serde_json::json!({ "mappings": { "dynamic": false } }),
            ALIAS,
            self.config.clone(),
        )
        .with_suffix(Some(suffix.to_string()))
    }

    /// Stored checkpoint cursor for a physical index.
    pub async fn checkpoint(&self, index: &str) -> Option<Cursor> {
        self.checkpoints
            .get_by_index_name(index)
            .await
            .expect("Failed to read checkpoint")
            .map(|c| c.last_cursor)
    }

    /// Document ids in a physical index.
    pub fn document_ids(&self, index: &str) -> BTreeSet<String> {
        self.sink.documents(index).into_keys().collect()
    }
}

/// `doc-{cursor}` ids, the ids [`InMemorySource::with_cursors`] assigns.
pub fn doc_ids(cursors: impl IntoIterator<Item = Cursor>) -> BTreeSet<String> {
    cursors.into_iter().map(|c| format!("doc-{}", c)).collect()
}

/// A plausible high score row.
pub fn high_score(score_id: u64, user_id: u32, beatmap_id: u32, enabled_mods: i32) -> HighScore {
    HighScore {
        score_id,
        beatmap_id,
        user_id,
        score: 500_000 + score_id as i32,
        max_combo: 200,
        rank: "A".to_string(),
        count50: 1,
        count100: 10,
        count300: 180,
        countmiss: 2,
        countgeki: 30,
        countkatu: 5,
        perfect: false,
        enabled_mods,
        date: Utc
            .timestamp_opt(1_520_000_000 + score_id as i64, 0)
            .single()
            .expect("valid timestamp"),
        pp: Some(123.5),
        replay: false,
        hidden: 0,
        country_acronym: "AU".to_string(),
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
