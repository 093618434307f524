//! MySQL-backed source using sqlx.
//!
//! Issues `SELECT * FROM <table> WHERE <cursor> > ? ORDER BY <cursor> ASC LIMIT ?`
//! and decodes rows into a typed [`SourceRow`].

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::FromRow;
use tracing::debug;

use reindex_types::{Cursor, Record};

use crate::error::SourceError;
use crate::source::{RowSource, SourceRow};

/// Open a connection pool for the source database.
///
/// Reads are strictly sequential, so a couple of connections is plenty.
pub async fn connect(database_url: &str) -> Result<MySqlPool, SourceError> {
    let pool = MySqlPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// A table read in cursor order and decoded as `R`.
pub struct MySqlSource<R> {
    pool: MySqlPool,
    name: String,
    query: String,
    _row: PhantomData<fn() -> R>,
}

impl<R> MySqlSource<R> {
    /// Create a source over `table` ordered by `cursor_column`.
    ///
    /// Both names are interpolated into SQL and must be plain identifiers.
    pub fn new(pool: MySqlPool, table: &str, cursor_column: &str) -> Result<Self, SourceError> {
        validate_identifier(table)?;
        validate_identifier(cursor_column)?;

        Ok(Self {
            pool,
            name: table.to_string(),
            query: chunk_query(table, cursor_column),
            _row: PhantomData,
        })
    }

    /// SQL issued for every chunk.
    pub fn query(&self) -> &str {
        &self.query
    }
}

#[async_trait]
impl<R> RowSource for MySqlSource<R>
where
    R: SourceRow + for<'r> FromRow<'r, MySqlRow> + Send + Unpin + 'static,
{
    async fn fetch_after(&self, after: Cursor, limit: usize) -> Result<Vec<Record>, SourceError> {
        debug!(table = %self.name, after, limit, "Querying chunk");

        let rows: Vec<R> = sqlx::query_as::<_, R>(&self.query)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(SourceRow::to_record).collect()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn chunk_query(table: &str, cursor_column: &str) -> String {
    format!(
        "SELECT * FROM `{table}` WHERE `{cursor}` > ? ORDER BY `{cursor}` ASC LIMIT ?",
        table = table,
        cursor = cursor_column
    )
}

fn validate_identifier(name: &str) -> Result<(), SourceError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_query() {
        assert_eq!(
            chunk_query("osu_scores_high", "score_id"),
            "SELECT * FROM `osu_scores_high` WHERE `score_id` > ? ORDER BY `score_id` ASC LIMIT ?"
        );
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("osu_scores_taiko_high").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("scores; DROP TABLE users").is_err());
        assert!(validate_identifier("a`b").is_err());
    }
}
