//! Category registry.
//!
//! Maps a category key (a ruleset such as `osu` or `mania`) to the table it
//! is read from and the typed row it decodes into. Built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::mysql::MySqlPool;

use crate::error::SourceError;
use crate::high_score::{HighScore, SCORE_CURSOR_COLUMN};
use crate::mysql::MySqlSource;
use crate::source::RowSource;

/// Index schema shared by every high score category.
pub const HIGH_SCORES_SCHEMA: &str = include_str!("../schemas/high_scores.json");

type BuildFn = fn(MySqlPool, &str, &str) -> Result<Arc<dyn RowSource>, SourceError>;

/// How to read one category.
#[derive(Clone)]
pub struct CategoryHandler {
    pub key: String,
    pub table: String,
    pub cursor_column: String,
    build: BuildFn,
}

impl CategoryHandler {
    /// Open a source for this category on `pool`.
    pub fn open(&self, pool: MySqlPool) -> Result<Arc<dyn RowSource>, SourceError> {
        (self.build)(pool, &self.table, &self.cursor_column)
    }
}

impl std::fmt::Debug for CategoryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryHandler")
            .field("key", &self.key)
            .field("table", &self.table)
            .field("cursor_column", &self.cursor_column)
            .finish()
    }
}

/// Registry of known categories.
#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    handlers: BTreeMap<String, CategoryHandler>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four high score rulesets.
    pub fn high_scores() -> Self {
        let mut registry = Self::new();
        for (key, table) in [
            ("osu", "osu_scores_high"),
            ("taiko", "osu_scores_taiko_high"),
            ("fruits", "osu_scores_fruits_high"),
            ("mania", "osu_scores_mania_high"),
        ] {
            registry.register::<HighScore>(key, table, SCORE_CURSOR_COLUMN);
        }
        registry
    }

    /// Register a typed row for `key`, replacing any previous handler.
    pub fn register<R>(&mut self, key: &str, table: &str, cursor_column: &str)
    where
        R: crate::source::SourceRow
            + for<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow>
            + Send
            + Unpin
            + 'static,
    {
        fn build<R>(
            pool: MySqlPool,
            table: &str,
            cursor_column: &str,
        ) -> Result<Arc<dyn RowSource>, SourceError>
        where
            R: crate::source::SourceRow
                + for<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow>
                + Send
                + Unpin
                + 'static,
        {
            Ok(Arc::new(MySqlSource::<R>::new(pool, table, cursor_column)?))
        }

        self.handlers.insert(
            key.to_string(),
            CategoryHandler {
                key: key.to_string(),
                table: table.to_string(),
                cursor_column: cursor_column.to_string(),
                build: build::<R>,
            },
        );
    }

    pub fn get(&self, key: &str) -> Result<&CategoryHandler, SourceError> {
        self.handlers
            .get(key)
            .ok_or_else(|| SourceError::UnknownCategory(key.to_string()))
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Open the source for `key`.
    pub fn open(&self, key: &str, pool: MySqlPool) -> Result<Arc<dyn RowSource>, SourceError> {
        self.get(key)?.open(pool)
    }
}
