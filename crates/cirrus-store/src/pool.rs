//! SQLite connection handling.
//!
//! The daemon keeps a single [`DatabasePool`] for its lifetime; the
//! dispatch task and background jobs all query through clones of the
//! underlying sqlx pool. Opening a pool also applies the schema (the
//! statements are `IF NOT EXISTS`, so reopening an existing file is a
//! no-op), which means a constructed pool is always ready to query.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::StoreError;

const SCHEMA_SQL: &str = include_str!("migrations/20260815_initial.sql");

/// Owner of the daemon's SQLite connections.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens the database file, creating it and its parent directories
    /// when missing.
    ///
    /// File-backed pools run in WAL mode with a busy timeout so readers
    /// are not blocked by the occasional write burst.
    ///
    /// # Errors
    ///
    /// `StoreError::ConnectionFailed` when the file cannot be opened,
    /// `StoreError::MigrationFailed` when the schema cannot be applied.
    pub async fn new(db_file: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "Cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = Self::open(options, 5).await?;
        tracing::info!(path = %db_file.display(), "Database opened");
        Ok(pool)
    }

    /// Opens a private in-memory database, used by tests.
    ///
    /// Pinned to one connection: an in-memory SQLite database is visible
    /// only to the connection that created it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        Self::open(options, 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// The underlying sqlx pool, shared with `SqliteStore`.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_ready_right_after_open() {
        let pool = DatabasePool::in_memory().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM syncs")
            .fetch_one(pool.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_file_pool_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_file = dir.path().join("state").join("cirrus.db");

        let pool = DatabasePool::new(&db_file).await.unwrap();
        assert!(db_file.exists());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_state")
            .fetch_one(pool.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_reopening_existing_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let db_file = dir.path().join("cirrus.db");

        {
            let pool = DatabasePool::new(&db_file).await.unwrap();
            sqlx::query("INSERT INTO app_state (key, value) VALUES ('appUid', 'x')")
                .execute(pool.pool())
                .await
                .unwrap();
        }

        let pool = DatabasePool::new(&db_file).await.unwrap();
        let value: String =
            sqlx::query_scalar("SELECT value FROM app_state WHERE key = 'appUid'")
                .fetch_one(pool.pool())
                .await
                .unwrap();
        assert_eq!(value, "x");
    }
}
