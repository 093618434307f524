//! Resume tests.
//!
//! A run picks up after the stored checkpoint, or after an explicit cursor,
//! and writes every row past that point exactly once.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use e2e_tests::{doc_ids, TestHarness, ALIAS};
use reindex_indexing::{
    InMemoryCheckpointStore, ResolutionKind, RocksCheckpointStore, RunRequest,
};
use reindex_sink::SearchSink;
use reindex_source::InMemorySource;
use reindex_types::CURSOR_MIN;

#[tokio::test]
async fn test_explicit_resume_skips_earlier_rows() {
    let harness = TestHarness::new(1..=5);
    let request = RunRequest {
        resume_from: Some(3),
        force_new: false,
    };

    let summary = harness
        .orchestrator("1")
        .run_once(request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.resumed_from, Some(3));
    assert_eq!(harness.source.queries()[0], (3, 2));
    assert_eq!(summary.stats.records, 2);
    assert_eq!(summary.last_cursor, Some(5));
    assert_eq!(harness.document_ids("high_scores_osu_1"), doc_ids([4, 5]));
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_gaps_or_repeats() {
    let mut harness = TestHarness::new(1..=5);
    harness.source.fail_after(2);

    let first = harness
        .orchestrator("1")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await;
    assert!(first.is_err());

    let stored = harness
        .checkpoint("high_scores_osu_1")
        .await
        .expect("index should be tracked");
    assert!([CURSOR_MIN, 2, 4].contains(&stored), "stored {}", stored);

    let source = harness.replace_source(InMemorySource::with_cursors("osu_scores_high", 1..=5));
    let summary = harness
        .orchestrator("2")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.index, "high_scores_osu_1");
    assert_eq!(summary.resolution, ResolutionKind::Unaliased);
    assert_eq!(source.queries()[0].0, stored);
    assert_eq!(
        summary.resumed_from,
        Some(stored).filter(|c| *c != CURSOR_MIN)
    );

    // Only rows past the checkpoint are written again.
    let expected = (1..=5).filter(|c| *c > stored).count() as u64;
    assert_eq!(summary.stats.records, expected);
    assert_eq!(summary.last_cursor, Some(5));
    assert_eq!(harness.document_ids("high_scores_osu_1"), doc_ids(1..=5));
    assert_eq!(
        harness.sink.indices_for_alias(ALIAS).await.unwrap(),
        vec!["high_scores_osu_1"]
    );
}

#[tokio::test]
async fn test_cancelled_run_is_resumed_by_the_next_one() {
    let harness = TestHarness::new(1..=5);

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(harness
        .orchestrator("1")
        .run_once(RunRequest::default(), &cancel)
        .await
        .is_err());
    assert!(harness.sink.indices_for_alias(ALIAS).await.unwrap().is_empty());

    let summary = harness
        .orchestrator("2")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.index, "high_scores_osu_1");
    assert_eq!(summary.resolution, ResolutionKind::Unaliased);
    assert_eq!(summary.last_cursor, Some(5));
}

#[tokio::test]
async fn test_rocksdb_checkpoints_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksCheckpointStore::open(dir.path()).unwrap());
    let mut harness = TestHarness::with_checkpoints(1..=5, store);

    let summary = harness
        .orchestrator("1")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.last_cursor, Some(5));

    // Release the database before reopening it.
    harness.checkpoints = Arc::new(InMemoryCheckpointStore::new());
    harness.checkpoints = Arc::new(RocksCheckpointStore::open(dir.path()).unwrap());
    assert_eq!(harness.checkpoint("high_scores_osu_1").await, Some(5));

    let source = harness.replace_source(InMemorySource::with_cursors("osu_scores_high", 1..=7));
    let summary = harness
        .orchestrator("2")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.resolution, ResolutionKind::Aliased);
    assert_eq!(summary.resumed_from, Some(5));
    assert_eq!(source.queries()[0], (5, 2));
    assert_eq!(summary.stats.records, 2);
    assert_eq!(summary.last_cursor, Some(7));
    assert_eq!(harness.document_ids("high_scores_osu_1"), doc_ids(1..=7));
}
