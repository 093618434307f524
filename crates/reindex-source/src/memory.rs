//! In-process source backed by an ordered map.
//!
//! Used by tests and dry runs. Every query is recorded so callers can check
//! the lower bounds the paginator asked for, and a failure can be injected
//! after a number of successful queries.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;

use reindex_types::{Cursor, Record};

use crate::error::SourceError;
use crate::source::RowSource;

#[derive(Default)]
struct State {
    rows: BTreeMap<Cursor, Record>,
    queries: Vec<(Cursor, usize)>,
    fail_after: Option<usize>,
    failures: usize,
}

/// Source holding its rows in memory.
#[derive(Default)]
pub struct InMemorySource {
    name: String,
    state: Mutex<State>,
}

impl InMemorySource {
    /// Create an empty source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Create a source whose rows have the given cursors and `doc-{cursor}` ids.
    pub fn with_cursors(name: impl Into<String>, cursors: impl IntoIterator<Item = Cursor>) -> Self {
        let source = Self::new(name);
        for cursor in cursors {
            source.insert(Record::new(
                cursor,
                format!("doc-{}", cursor),
                serde_json::json!({ "cursor": cursor }),
            ));
        }
        source
    }

    /// Insert or replace a row.
    pub fn insert(&self, record: Record) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.rows.insert(record.cursor, record);
    }

    /// Make every query after the first `successful` ones fail.
    pub fn fail_after(&self, successful: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.fail_after = Some(successful);
    }

    /// Stop failing queries.
    pub fn recover(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.fail_after = None;
    }

    /// Number of queries refused so far.
    pub fn failures(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failures
    }

    /// `(after, limit)` of every successful query so far.
    pub fn queries(&self) -> Vec<(Cursor, usize)> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.queries.clone()
    }

    pub fn row_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.rows.len()
    }
}

#[async_trait]
impl RowSource for InMemorySource {
    async fn fetch_after(&self, after: Cursor, limit: usize) -> Result<Vec<Record>, SourceError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(successful) = state.fail_after {
            if state.queries.len() >= successful {
                state.failures += 1;
                return Err(SourceError::Unavailable(format!(
                    "{}: connection lost",
                    self.name
                )));
            }
        }

        state.queries.push((after, limit));
        Ok(state
            .rows
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_after_is_exclusive() {
        let source = InMemorySource::with_cursors("scores", [1, 2, 3, 4, 5]);

        let rows = source.fetch_after(2, 10).await.unwrap();
        let cursors: Vec<_> = rows.iter().map(|r| r.cursor).collect();
        assert_eq!(cursors, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_fetch_after_respects_limit() {
        let source = InMemorySource::with_cursors("scores", 1..=10);
        let rows = source.fetch_after(0, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(source.queries(), vec![(0, 3)]);
    }

    #[tokio::test]
    async fn test_fail_after() {
        let source = InMemorySource::with_cursors("scores", 1..=10);
        source.fail_after(1);

        assert!(source.fetch_after(0, 2).await.is_ok());
        let err = source.fetch_after(2, 2).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert_eq!(source.failures(), 1);

        source.recover();
        assert_eq!(source.fetch_after(2, 2).await.unwrap().len(), 2);
        assert_eq!(source.queries(), vec![(0, 2), (2, 2)]);
    }
}
