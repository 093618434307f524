//! Cursor-based pagination over a [`RowSource`].
//!
//! The paginator keeps the last cursor it has seen and asks the source for
//! rows strictly after it. Each non-empty answer becomes a [`Batch`] and moves
//! the lower bound to the batch's high-water cursor; an empty answer ends the
//! sequence. A paginator is single-use: once exhausted (or failed) it yields
//! nothing more, and restarting needs a fresh instance.

use std::sync::Arc;

use futures::Stream;
use tracing::{debug, info};

use reindex_types::{Batch, Cursor, CURSOR_MIN};

use crate::error::SourceError;
use crate::source::RowSource;

/// Reads ordered, non-overlapping batches from a source.
pub struct CursorPaginator {
    source: Arc<dyn RowSource>,
    chunk_size: usize,
    last_seen: Cursor,
    finished: bool,
}

impl CursorPaginator {
    /// Create a paginator starting after `resume_from`, or from the minimum
    /// cursor when `None` (full scan).
    pub fn new(source: Arc<dyn RowSource>, chunk_size: usize, resume_from: Option<Cursor>) -> Self {
        let last_seen = resume_from.unwrap_or(CURSOR_MIN);
        info!(source = %source.name(), chunk_size, last_seen, "Starting pagination");

        Self {
            source,
            chunk_size: chunk_size.max(1),
            last_seen,
            finished: false,
        }
    }

    /// Exclusive lower bound of the next query.
    pub fn last_seen(&self) -> Cursor {
        self.last_seen
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetch the next batch, or `None` once the source is exhausted.
    ///
    /// Query errors are returned as-is and end the sequence.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, SourceError> {
        if self.finished {
            return Ok(None);
        }

        let rows = match self.source.fetch_after(self.last_seen, self.chunk_size).await {
            Ok(rows) => rows,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        if rows.is_empty() {
            debug!(source = %self.source.name(), last_seen = self.last_seen, "Source exhausted");
            self.finished = true;
            return Ok(None);
        }

        if let Err(e) = self.check_rows(&rows) {
            self.finished = true;
            return Err(e);
        }

        let batch = Batch::new(rows).map_err(|e| {
            self.finished = true;
            SourceError::OutOfOrder(e.to_string())
        })?;

        debug!(
            source = %self.source.name(),
            first = batch.first_cursor(),
            last = batch.high_water(),
            count = batch.len(),
            "Fetched batch"
        );

        self.last_seen = batch.high_water();
        Ok(Some(batch))
    }

    fn check_rows(&self, rows: &[reindex_types::Record]) -> Result<(), SourceError> {
        if rows.len() > self.chunk_size {
            return Err(SourceError::OutOfOrder(format!(
                "{} rows returned for a limit of {}",
                rows.len(),
                self.chunk_size
            )));
        }
        if rows[0].cursor <= self.last_seen {
            return Err(SourceError::OutOfOrder(format!(
                "cursor {} is not after {}",
                rows[0].cursor, self.last_seen
            )));
        }
        Ok(())
    }

    /// Turn the paginator into a stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch, SourceError>> + Send {
        futures::stream::try_unfold(self, |mut paginator| async move {
            Ok(paginator
                .next_batch()
                .await?
                .map(|batch| (batch, paginator)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySource;
    use futures::TryStreamExt;

    async fn collect(paginator: &mut CursorPaginator) -> Vec<Vec<Cursor>> {
        let mut batches = Vec::new();
        while let Some(batch) = paginator.next_batch().await.unwrap() {
            batches.push(batch.cursors());
        }
        batches
    }

    #[tokio::test]
    async fn test_chunks_of_two() {
        let source = Arc::new(InMemorySource::with_cursors("scores", [1, 2, 3, 4, 5]));
        let mut paginator = CursorPaginator::new(source.clone(), 2, None);

        let batches = collect(&mut paginator).await;
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);

        // Each lower bound is the previous high-water cursor.
        let bounds: Vec<_> = source.queries().iter().map(|(after, _)| *after).collect();
        assert_eq!(bounds, vec![CURSOR_MIN, 2, 4, 5]);
    }

    #[tokio::test]
    async fn test_not_restartable() {
        let source = Arc::new(InMemorySource::with_cursors("scores", [1, 2]));
        let mut paginator = CursorPaginator::new(source.clone(), 5, None);

        assert!(paginator.next_batch().await.unwrap().is_some());
        assert!(paginator.next_batch().await.unwrap().is_none());
        assert!(paginator.is_finished());

        // More rows arrive, but an exhausted paginator stays exhausted.
        source.insert(reindex_types::Record::new(3, "doc-3", serde_json::json!({})));
        assert!(paginator.next_batch().await.unwrap().is_none());
        assert_eq!(source.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_never_repeats_or_skips() {
        let cursors: Vec<Cursor> = vec![2, 3, 5, 8, 13, 21, 34, 55];

        for chunk_size in 1..=4 {
            for resume in [None, Some(0), Some(3), Some(4), Some(21), Some(55), Some(100)] {
                let source = Arc::new(InMemorySource::with_cursors("scores", cursors.clone()));
                let mut paginator = CursorPaginator::new(source, chunk_size, resume);
                let batches = collect(&mut paginator).await;

                for pair in batches.windows(2) {
                    assert!(pair[0].last().unwrap() < pair[1].first().unwrap());
                }
                for batch in &batches {
                    assert!(batch.len() <= chunk_size);
                }

                let seen: Vec<Cursor> = batches.into_iter().flatten().collect();
                let expected: Vec<Cursor> = cursors
                    .iter()
                    .copied()
                    .filter(|c| resume.map_or(true, |r| *c > r))
                    .collect();
                assert_eq!(seen, expected, "chunk_size={} resume={:?}", chunk_size, resume);
            }
        }
    }

    #[tokio::test]
    async fn test_query_error_propagates_and_finishes() {
        let source = Arc::new(InMemorySource::with_cursors("scores", 1..=10));
        source.fail_after(1);
        let mut paginator = CursorPaginator::new(source, 3, None);

        assert_eq!(paginator.next_batch().await.unwrap().unwrap().cursors(), vec![1, 2, 3]);
        assert!(matches!(
            paginator.next_batch().await,
            Err(SourceError::Unavailable(_))
        ));
        assert_eq!(paginator.last_seen(), 3);
        assert!(paginator.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let source = Arc::new(InMemorySource::with_cursors("scores", 1..=7));
        let batches: Vec<Batch> = CursorPaginator::new(source, 3, Some(1))
            .into_stream()
            .try_collect()
            .await
            .unwrap();

        let cursors: Vec<_> = batches.iter().map(|b| b.cursors()).collect();
        assert_eq!(cursors, vec![vec![2, 3, 4], vec![5, 6, 7]]);
    }
}
