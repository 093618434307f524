//! Checkpoints stored as documents in the search cluster.
//!
//! Each physical index gets one document in `{prefix}index_meta`, keyed by
//! the index name. Writes go through a painless scripted upsert that only
//! replaces `last_id` when the incoming value is larger, so the max-merge
//! happens server side.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use reindex_sink::{ElasticsearchClient, SearchSink, SinkError};
use reindex_types::Checkpoint;

use crate::checkpoint::CheckpointStore;
use crate::error::IndexingError;

const MAX_MERGE_SCRIPT: &str = "if (ctx._source.last_id == null || params.last_id > ctx._source.last_id) { \
     ctx._source.last_id = params.last_id; \
     ctx._source.updated_at = params.updated_at; \
     ctx._source.alias = params.alias; \
     } else { ctx.op = 'noop'; }";

// More indices than this under one alias means something is very wrong.
const MAX_PER_ALIAS: usize = 1000;

fn meta_schema() -> Value {
    json!({
        "settings": { "index": { "number_of_shards": 1 } },
        "mappings": {
            "properties": {
                "index": { "type": "keyword" },
                "alias": { "type": "keyword" },
                "last_id": { "type": "long" },
                "updated_at": { "type": "date" }
            }
        }
    })
}

/// `index_meta` documents in Elasticsearch.
pub struct ElasticCheckpointStore {
    client: Arc<ElasticsearchClient>,
    index: String,
    ready: OnceCell<()>,
}

impl ElasticCheckpointStore {
    /// Store checkpoints in `index` (usually `Settings::index_meta_name()`).
    pub fn new(client: Arc<ElasticsearchClient>, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            ready: OnceCell::new(),
        }
    }

    /// Create the meta index on first use.
    async fn ensure_index(&self) -> Result<(), IndexingError> {
        self.ready
            .get_or_try_init(|| async {
                if self.client.index_exists(&self.index).await? {
                    return Ok::<(), IndexingError>(());
                }
                match self.client.create_index(&self.index, &meta_schema()).await {
                    Ok(()) => {
                        info!(index = %self.index, "Created checkpoint index");
                        Ok(())
                    }
                    // Another process won the race.
                    Err(SinkError::IndexExists(_)) => Ok(()),
                    Err(e) => Err(IndexingError::from(e)),
                }
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl CheckpointStore for ElasticCheckpointStore {
    async fn get_by_index_name(&self, index: &str) -> Result<Option<Checkpoint>, IndexingError> {
        match self.client.get_document(&self.index, index).await? {
            Some(source) => Ok(Some(serde_json::from_value(source)?)),
            None => Ok(None),
        }
    }

    async fn get_by_alias(&self, alias: &str) -> Result<Vec<Checkpoint>, IndexingError> {
        let mut checkpoints = self
            .client
            .search_term(&self.index, "alias", alias, MAX_PER_ALIAS)
            .await?
            .into_iter()
            .map(serde_json::from_value::<Checkpoint>)
            .collect::<Result<Vec<_>, _>>()?;

        checkpoints.sort_by(|a, b| a.physical_index.cmp(&b.physical_index));
        Ok(checkpoints)
    }

    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError> {
        self.ensure_index().await?;

        let params = json!({
            "last_id": checkpoint.last_cursor,
            "updated_at": checkpoint.updated_at,
            "alias": checkpoint.alias,
        });

        self.client
            .scripted_update(
                &self.index,
                &checkpoint.physical_index,
                MAX_MERGE_SCRIPT,
                params,
                serde_json::to_value(checkpoint)?,
            )
            .await?;

        debug!(
            index = %checkpoint.physical_index,
            last_cursor = checkpoint.last_cursor,
            "Stored checkpoint"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}
