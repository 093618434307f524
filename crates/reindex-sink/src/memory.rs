//! In-process sink for tests.
//!
//! Indices and aliases live behind a single lock so an alias update is
//! observed all-or-nothing, like the cluster's `_aliases` endpoint. Overload
//! and bad documents can be injected to drive the retry paths.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use reindex_types::{Cursor, Record};

use crate::error::SinkError;
use crate::sink::{AliasAction, BulkItemOutcome, BulkResponse, SearchSink};

#[derive(Debug, Default)]
struct IndexState {
    schema: Value,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct ClusterState {
    indices: BTreeMap<String, IndexState>,
    /// alias -> indices it points to
    aliases: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Cursors whose next write is answered with a 429
    rate_limit_once: HashSet<Cursor>,
    /// Document ids that are always rejected, with the reason
    rejected: HashMap<String, String>,
    /// Number of upcoming bulk requests that fail at the transport level
    transport_failures: usize,
    /// Extra response time for any request carrying one of these cursors
    latency: HashMap<Cursor, Duration>,
}

/// Sink holding indices in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cluster: RwLock<ClusterState>,
    faults: Mutex<Faults>,
    bulk_calls: AtomicUsize,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next write of the record with this cursor with a 429.
    pub fn rate_limit_once(&self, cursor: Cursor) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.rate_limit_once.insert(cursor);
    }

    /// Reject every write of the document with this id.
    pub fn reject_document(&self, id: impl Into<String>, reason: impl Into<String>) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.rejected.insert(id.into(), reason.into());
    }

    /// Fail the next `count` bulk requests as if the connection dropped.
    pub fn fail_next_requests(&self, count: usize) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.transport_failures = count;
    }

    /// Hold back the response to every request carrying this cursor.
    pub fn delay_cursor(&self, cursor: Cursor, latency: Duration) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.latency.insert(cursor, latency);
    }

    /// Number of bulk requests received, including failed ones.
    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// Names of all physical indices.
    pub fn indices(&self) -> Vec<String> {
        let cluster = self.cluster.read().unwrap_or_else(|e| e.into_inner());
        cluster.indices.keys().cloned().collect()
    }

    /// Schema an index was created with.
    pub fn schema(&self, index: &str) -> Option<Value> {
        let cluster = self.cluster.read().unwrap_or_else(|e| e.into_inner());
        cluster.indices.get(index).map(|state| state.schema.clone())
    }

    /// Documents of an index by id.
    pub fn documents(&self, index: &str) -> BTreeMap<String, Value> {
        let cluster = self.cluster.read().unwrap_or_else(|e| e.into_inner());
        cluster
            .indices
            .get(index)
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }

    pub fn document_count(&self, index: &str) -> usize {
        let cluster = self.cluster.read().unwrap_or_else(|e| e.into_inner());
        cluster
            .indices
            .get(index)
            .map_or(0, |state| state.documents.len())
    }

    /// Documents visible through an alias, the way a reader would search it.
    pub fn search_alias(&self, alias: &str) -> BTreeMap<String, Value> {
        let cluster = self.cluster.read().unwrap_or_else(|e| e.into_inner());
        let mut documents = BTreeMap::new();
        for index in cluster.aliases.get(alias).into_iter().flatten() {
            if let Some(state) = cluster.indices.get(index) {
                documents.extend(state.documents.clone());
            }
        }
        documents
    }
}

#[async_trait]
impl SearchSink for InMemorySink {
    async fn bulk(&self, index: &str, records: &[Record]) -> Result<BulkResponse, SinkError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);

        let latency = {
            let faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
            records
                .iter()
                .filter_map(|record| faults.latency.get(&record.cursor).copied())
                .max()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let outcomes: Vec<(BulkItemOutcome, Option<&Record>)> = {
            let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
            if faults.transport_failures > 0 {
                faults.transport_failures -= 1;
                return Err(SinkError::Transport("connection reset".to_string()));
            }

            records
                .iter()
                .map(|record| {
                    if faults.rate_limit_once.remove(&record.cursor) {
                        (BulkItemOutcome::RateLimited { id: record.id.clone() }, None)
                    } else if let Some(reason) = faults.rejected.get(&record.id) {
                        (
                            BulkItemOutcome::from_status(record.id.clone(), 400, reason.clone()),
                            None,
                        )
                    } else {
                        (BulkItemOutcome::Success { id: record.id.clone() }, Some(record))
                    }
                })
                .collect()
        };

        let mut cluster = self.cluster.write().unwrap_or_else(|e| e.into_inner());
        let state = cluster
            .indices
            .get_mut(index)
            .ok_or_else(|| SinkError::NotFound(index.to_string()))?;

        let mut items = Vec::with_capacity(outcomes.len());
        for (outcome, record) in outcomes {
            if let Some(record) = record {
                state
                    .documents
                    .insert(record.id.clone(), record.document.clone());
            }
            items.push(outcome);
        }

        Ok(BulkResponse::new(items))
    }

    async fn create_index(&self, index: &str, schema: &Value) -> Result<(), SinkError> {
        let mut cluster = self.cluster.write().unwrap_or_else(|e| e.into_inner());
        if cluster.indices.contains_key(index) {
            return Err(SinkError::IndexExists(index.to_string()));
        }

        cluster.indices.insert(
            index.to_string(),
            IndexState {
                schema: schema.clone(),
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn indices_for_alias(&self, alias: &str) -> Result<Vec<String>, SinkError> {
        let cluster = self.cluster.read().unwrap_or_else(|e| e.into_inner());
        Ok(cluster
            .aliases
            .get(alias)
            .map(|indices| indices.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SinkError> {
        let mut cluster = self.cluster.write().unwrap_or_else(|e| e.into_inner());

        // Validate everything before touching anything.
        for action in actions {
            let (AliasAction::Add { index, .. } | AliasAction::Remove { index, .. }) = action;
            if !cluster.indices.contains_key(index) {
                return Err(SinkError::NotFound(index.clone()));
            }
            if let AliasAction::Remove { index, alias } = action {
                let bound = cluster
                    .aliases
                    .get(alias)
                    .is_some_and(|indices| indices.contains(index));
                if !bound {
                    return Err(SinkError::NotFound(format!("alias {} on {}", alias, index)));
                }
            }
        }

        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    cluster
                        .aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(indices) = cluster.aliases.get_mut(alias) {
                        indices.remove(index);
                        if indices.is_empty() {
                            cluster.aliases.remove(alias);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(cursor: Cursor) -> Record {
        Record::new(cursor, format!("doc-{}", cursor), json!({ "cursor": cursor }))
    }

    #[tokio::test]
    async fn test_bulk_requires_index() {
        let sink = InMemorySink::new();
        let err = sink.bulk("scores_1", &[record(1)]).await.unwrap_err();
        assert!(matches!(err, SinkError::NotFound(_)));

        sink.create_index("scores_1", &json!({})).await.unwrap();
        let response = sink.bulk("scores_1", &[record(1), record(2)]).await.unwrap();
        assert_eq!(response.succeeded(), 2);
        assert_eq!(sink.document_count("scores_1"), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_once() {
        let sink = InMemorySink::new();
        sink.create_index("scores_1", &json!({})).await.unwrap();
        sink.rate_limit_once(2);

        let first = sink.bulk("scores_1", &[record(1), record(2)]).await.unwrap();
        assert!(first.is_rate_limited());
        assert_eq!(sink.document_count("scores_1"), 1);

        let second = sink.bulk("scores_1", &[record(1), record(2)]).await.unwrap();
        assert!(!second.is_rate_limited());
        assert_eq!(sink.document_count("scores_1"), 2);
        assert_eq!(sink.bulk_calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_document() {
        let sink = InMemorySink::new();
        sink.create_index("scores_1", &json!({})).await.unwrap();
        sink.reject_document("doc-2", "mapper_parsing_exception");

        let response = sink.bulk("scores_1", &[record(1), record(2)]).await.unwrap();
        assert_eq!(response.failures().count(), 1);
        assert!(!sink.documents("scores_1").contains_key("doc-2"));
    }

    #[tokio::test]
    async fn test_transport_failures() {
        let sink = InMemorySink::new();
        sink.create_index("scores_1", &json!({})).await.unwrap();
        sink.fail_next_requests(1);

        assert!(sink.bulk("scores_1", &[record(1)]).await.unwrap_err().is_transient());
        assert!(sink.bulk("scores_1", &[record(1)]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_cursor() {
        let sink = InMemorySink::new();
        sink.create_index("scores_1", &json!({})).await.unwrap();
        sink.delay_cursor(2, Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        sink.bulk("scores_1", &[record(1)]).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));

        sink.bulk("scores_1", &[record(1), record(2)]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(sink.document_count("scores_1"), 2);
    }

    #[tokio::test]
    async fn test_alias_update_is_all_or_nothing() {
        let sink = InMemorySink::new();
        sink.create_index("scores_1", &json!({})).await.unwrap();
        sink.create_index("scores_2", &json!({})).await.unwrap();
        sink.update_aliases(&[AliasAction::add("scores_1", "scores")])
            .await
            .unwrap();

        // The second action names a missing index, so nothing changes.
        let err = sink
            .update_aliases(&[
                AliasAction::remove("scores_1", "scores"),
                AliasAction::add("scores_3", "scores"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::NotFound(_)));
        assert_eq!(sink.indices_for_alias("scores").await.unwrap(), vec!["scores_1"]);

        sink.update_aliases(&[
            AliasAction::remove("scores_1", "scores"),
            AliasAction::add("scores_2", "scores"),
        ])
        .await
        .unwrap();
        assert_eq!(sink.indices_for_alias("scores").await.unwrap(), vec!["scores_2"]);
        assert_eq!(sink.indices(), vec!["scores_1", "scores_2"]);
    }

    #[tokio::test]
    async fn test_create_index_twice() {
        let sink = InMemorySink::new();
        sink.create_index("scores_1", &json!({ "settings": {} })).await.unwrap();
        assert!(matches!(
            sink.create_index("scores_1", &json!({})).await,
            Err(SinkError::IndexExists(_))
        ));
        assert_eq!(sink.schema("scores_1"), Some(json!({ "settings": {} })));
    }
}
