//! End-to-end pipeline tests for the reindexer.
//!
//! A full run reads the source in cursor order, writes every row once,
//! checkpoints the last cursor and points the alias at the new index.

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use e2e_tests::{doc_ids, high_score, TestHarness, ALIAS};
use reindex_indexing::{ResolutionKind, RunPhase, RunRequest};
use reindex_sink::SearchSink;
use reindex_source::{InMemorySource, SourceRow};
use reindex_types::CURSOR_MIN;

#[tokio::test]
async fn test_full_run_in_chunks() {
    let harness = TestHarness::new(1..=5);
    let orchestrator = harness.orchestrator("1");

    let summary = orchestrator
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();

    // Chunks of two: [1,2] [3,4] [5], then one empty read.
    assert_eq!(
        harness.source.queries(),
        vec![(CURSOR_MIN, 2), (2, 2), (4, 2), (5, 2)]
    );
    assert_eq!(harness.sink.bulk_calls(), 3);

    assert_eq!(summary.index, "high_scores_osu_1");
    assert_eq!(summary.resolution, ResolutionKind::Created);
    assert_eq!(summary.resumed_from, None);
    assert_eq!(summary.produced, 5);
    assert_eq!(summary.stats.records, 5);
    assert_eq!(summary.stats.batches, 3);
    assert_eq!(summary.stats.retries, 0);
    assert_eq!(summary.last_cursor, Some(5));

    assert_eq!(harness.checkpoint("high_scores_osu_1").await, Some(5));
    assert_eq!(harness.document_ids("high_scores_osu_1"), doc_ids(1..=5));
    assert_eq!(
        harness.sink.indices_for_alias(ALIAS).await.unwrap(),
        vec!["high_scores_osu_1"]
    );
    assert_eq!(
        harness.sink.schema("high_scores_osu_1"),
        Some(json!({ "mappings": { "dynamic": false } }))
    );
    assert_eq!(orchestrator.phase(), RunPhase::Done);
}

#[tokio::test]
async fn test_empty_source_still_swaps() {
    let harness = TestHarness::new(Vec::new());

    let summary = harness
        .orchestrator("1")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.produced, 0);
    assert_eq!(harness.sink.bulk_calls(), 0);
    assert_eq!(summary.last_cursor, Some(CURSOR_MIN));
    assert_eq!(
        harness.sink.indices_for_alias(ALIAS).await.unwrap(),
        vec!["high_scores_osu_1"]
    );
}

#[tokio::test]
async fn test_high_score_rows_are_keyed_by_natural_key() {
    let mut harness = TestHarness::new(Vec::new());
    let source = harness.replace_source(InMemorySource::new("osu_scores_high"));
    for score in [
        high_score(10, 2, 75, 0),
        high_score(11, 2, 76, 72),
        high_score(12, 3, 75, 576),
    ] {
        source.insert(score.to_record().unwrap());
    }

    let summary = harness
        .orchestrator("1")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.last_cursor, Some(12));

    let documents = harness.sink.search_alias(ALIAS);
    assert_eq!(
        documents.keys().cloned().collect::<Vec<_>>(),
        vec!["2-75-0", "2-76-72", "3-75-576"]
    );
    assert_eq!(documents["2-75-0"]["enabled_mods"], json!([]));
    assert_eq!(documents["2-76-72"]["enabled_mods"], json!(["HD", "DT"]));
    // Nightcore hides the double time it implies.
    assert_eq!(documents["3-75-576"]["enabled_mods"], json!(["NC"]));
    assert_eq!(documents["3-75-576"]["score_id"], 12);
}

#[tokio::test]
async fn test_rejected_documents_are_skipped_not_retried() {
    let harness = TestHarness::new(1..=5);
    harness
        .sink
        .reject_document("doc-3", "mapper_parsing_exception");

    let summary = harness
        .orchestrator("1")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.stats.failed_items, 1);
    assert_eq!(summary.stats.records, 4);
    assert_eq!(summary.stats.retries, 0);
    assert_eq!(harness.sink.bulk_calls(), 3);
    assert_eq!(summary.last_cursor, Some(5));
    assert_eq!(
        harness.document_ids("high_scores_osu_1"),
        doc_ids([1, 2, 4, 5])
    );
}

#[tokio::test]
async fn test_connection_failures_are_retried() {
    let harness = TestHarness::new(1..=5);
    harness.sink.fail_next_requests(2);

    let summary = harness
        .orchestrator("1")
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.stats.retries, 2);
    assert_eq!(summary.stats.batches, 3);
    assert_eq!(summary.stats.records, 5);
    assert_eq!(harness.sink.bulk_calls(), 5);
    assert_eq!(summary.last_cursor, Some(5));
    assert_eq!(harness.document_ids("high_scores_osu_1"), doc_ids(1..=5));
}

#[tokio::test]
async fn test_source_failure_fails_run_without_swap() {
    let harness = TestHarness::new(1..=5);
    harness.source.fail_after(1);
    let orchestrator = harness.orchestrator("1");

    let err = orchestrator
        .run_once(RunRequest::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("connection lost"), "got: {}", err);
    assert_eq!(orchestrator.phase(), RunPhase::Failed);
    assert!(harness.sink.indices_for_alias(ALIAS).await.unwrap().is_empty());
    // The index stays tracked so the next run resumes it.
    assert!(harness.checkpoint("high_scores_osu_1").await.is_some());
}
