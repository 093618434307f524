//! Checkpoints in a local RocksDB directory.
//!
//! Keys are `index:{physical_index}`, values are the checkpoint as JSON.
//! Useful when the checkpoint history should outlive the cluster, or when
//! the cluster user may not write a meta index.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use tracing::{debug, info};

use reindex_types::Checkpoint;

use crate::checkpoint::CheckpointStore;
use crate::error::IndexingError;

const KEY_PREFIX: &[u8] = b"index:";

fn key(index: &str) -> Vec<u8> {
    let mut key = KEY_PREFIX.to_vec();
    key.extend_from_slice(index.as_bytes());
    key
}

/// RocksDB-backed checkpoint store.
pub struct RocksCheckpointStore {
    db: DB,
    /// Serializes read-merge-write cycles
    write_lock: Mutex<()>,
}

impl RocksCheckpointStore {
    /// Open the store at `path`, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, IndexingError> {
        info!("Opening checkpoint store at {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn read(&self, index: &str) -> Result<Option<Checkpoint>, IndexingError> {
        match self.db.get(key(index))? {
            Some(bytes) => Ok(Some(Checkpoint::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for RocksCheckpointStore {
    async fn get_by_index_name(&self, index: &str) -> Result<Option<Checkpoint>, IndexingError> {
        self.read(index)
    }

    async fn get_by_alias(&self, alias: &str) -> Result<Vec<Checkpoint>, IndexingError> {
        let mut checkpoints = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(KEY_PREFIX, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(KEY_PREFIX) {
                break;
            }
            let checkpoint = Checkpoint::from_bytes(&value)?;
            if checkpoint.alias == alias {
                checkpoints.push(checkpoint);
            }
        }

        Ok(checkpoints)
    }

    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let merged = match self.read(&checkpoint.physical_index)? {
            Some(mut existing) => {
                if !existing.merge(checkpoint) {
                    return Ok(());
                }
                existing
            }
            None => checkpoint.clone(),
        };

        self.db
            .put(key(&merged.physical_index), merged.to_bytes()?)?;
        debug!(
            index = %merged.physical_index,
            last_cursor = merged.last_cursor,
            "Stored checkpoint"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = RocksCheckpointStore::open(dir.path()).unwrap();

        store
            .upsert(&Checkpoint::new("high_scores_osu_1", "high_scores_osu", 7))
            .await
            .unwrap();
        store
            .upsert(&Checkpoint::new("high_scores_osu_1", "high_scores_osu", 3))
            .await
            .unwrap();

        let checkpoint = store
            .get_by_index_name("high_scores_osu_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.last_cursor, 7);
        assert!(store.get_by_index_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_alias_filters() {
        let dir = TempDir::new().unwrap();
        let store = RocksCheckpointStore::open(dir.path()).unwrap();

        for (index, alias) in [
            ("high_scores_osu_2", "high_scores_osu"),
            ("high_scores_mania_1", "high_scores_mania"),
            ("high_scores_osu_1", "high_scores_osu"),
        ] {
            store.upsert(&Checkpoint::new(index, alias, 1)).await.unwrap();
        }

        let names: Vec<_> = store
            .get_by_alias("high_scores_osu")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.physical_index)
            .collect();
        assert_eq!(names, vec!["high_scores_osu_1", "high_scores_osu_2"]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksCheckpointStore::open(dir.path()).unwrap();
            store
                .upsert(&Checkpoint::new("high_scores_osu_1", "high_scores_osu", 42))
                .await
                .unwrap();
        }

        let store = RocksCheckpointStore::open(dir.path()).unwrap();
        let checkpoint = store
            .get_by_index_name("high_scores_osu_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.last_cursor, 42);
    }
}
