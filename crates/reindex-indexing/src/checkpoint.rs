//! Checkpoint persistence.
//!
//! A [`CheckpointStore`] records how far each physical index has been
//! written. Writes are max-merged on `last_cursor`, so concurrent or
//! reordered upserts can never move a checkpoint backwards.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use reindex_types::Checkpoint;

use crate::error::IndexingError;

/// Durable store of per-index checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Checkpoint of one physical index, if any.
    async fn get_by_index_name(&self, index: &str) -> Result<Option<Checkpoint>, IndexingError>;

    /// Every checkpoint recorded under `alias`, ordered by physical index name.
    async fn get_by_alias(&self, alias: &str) -> Result<Vec<Checkpoint>, IndexingError>;

    /// Insert or advance a checkpoint. A lower `last_cursor` than the stored
    /// one is ignored.
    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Checkpoints kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<String, Checkpoint>>,
    upserts: AtomicUsize,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upsert calls received.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// All stored checkpoints.
    pub fn all(&self) -> Vec<Checkpoint> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        checkpoints.values().cloned().collect()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_by_index_name(&self, index: &str) -> Result<Option<Checkpoint>, IndexingError> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        Ok(checkpoints.get(index).cloned())
    }

    async fn get_by_alias(&self, alias: &str) -> Result<Vec<Checkpoint>, IndexingError> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        Ok(checkpoints
            .values()
            .filter(|c| c.alias == alias)
            .cloned()
            .collect())
    }

    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);

        let mut checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        match checkpoints.get_mut(&checkpoint.physical_index) {
            Some(existing) => {
                existing.merge(checkpoint);
            }
            None => {
                checkpoints.insert(checkpoint.physical_index.clone(), checkpoint.clone());
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Store that refuses writes at or above `fail_from`, a limited number of times.
#[cfg(test)]
pub(crate) struct FlakyCheckpointStore {
    inner: InMemoryCheckpointStore,
    fail_from: reindex_types::Cursor,
    failures: Mutex<usize>,
}

#[cfg(test)]
impl FlakyCheckpointStore {
    pub(crate) fn new(fail_from: reindex_types::Cursor, failures: usize) -> Self {
        Self {
            inner: InMemoryCheckpointStore::new(),
            fail_from,
            failures: Mutex::new(failures),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CheckpointStore for FlakyCheckpointStore {
    async fn get_by_index_name(&self, index: &str) -> Result<Option<Checkpoint>, IndexingError> {
        self.inner.get_by_index_name(index).await
    }

    async fn get_by_alias(&self, alias: &str) -> Result<Vec<Checkpoint>, IndexingError> {
        self.inner.get_by_alias(alias).await
    }

    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), IndexingError> {
        if checkpoint.last_cursor >= self.fail_from {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(IndexingError::Checkpoint("index_meta update rejected".to_string()));
            }
        }
        self.inner.upsert(checkpoint).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
