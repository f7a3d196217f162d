//! Cirrus Store - durable daemon state
//!
//! SQLite-backed persistence for:
//! - Users, accounts, drives and sync configurations
//! - Selective-sync node sets (black / white / undecided)
//! - Recorded errors (server, sync and node level)
//! - Key/value application state (restart timestamps, log upload progress)
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteStore`] - Repository over all daemon entities
//! - [`StoreError`] - Error types for store operations

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStore;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}
