//! SQLite repository over the daemon's durable entities
//!
//! One repository covers the whole schema: users, accounts, drives, syncs,
//! selective-sync node sets, recorded errors and the key/value process
//! state. It handles all domain type serialization/deserialization and SQL
//! query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type          | SQL Type | Strategy                                    |
//! |----------------------|----------|---------------------------------------------|
//! | db ids               | INTEGER  | `i64`, assigned by SQLite on insert         |
//! | PathBuf              | TEXT     | lossy display string / `PathBuf::from`      |
//! | NodeId               | TEXT     | `.as_str()` / `NodeId::new()`               |
//! | VfsMode, NodeSetKind | TEXT     | `.as_str()` / `::parse()`                   |
//! | ErrorLevel           | TEXT     | `.as_str()` / `::parse()`                   |
//! | ExitCode, ExitCause  | TEXT     | serde variant name                          |
//! | DateTime<Utc>        | TEXT     | ISO 8601 via `to_rfc3339()`                 |

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use cirrus_core::domain::{
    Account, AppStateKey, Drive, ErrorLevel, ErrorRecord, NodeId, NodeSetKind, Sync, User, VfsMode,
};
use cirrus_core::{ExitCause, ExitCode};

use crate::StoreError;

/// Repository over the Cirrus state database
///
/// All operations go through a connection pool for concurrency. Writes that
/// touch several rows (node-set replacement) run in a transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Serialize an ExitCode to its variant name for storage
fn exit_code_to_string(code: ExitCode) -> String {
    format!("{code}")
}

/// Deserialize an ExitCode from its stored variant name
fn exit_code_from_string(s: &str) -> Result<ExitCode, StoreError> {
    serde_json::from_str(&format!("\"{s}\""))
        .map_err(|e| StoreError::SerializationError(format!("Unknown exit code '{s}': {e}")))
}

/// Serialize an ExitCause to its variant name for storage
fn exit_cause_to_string(cause: ExitCause) -> String {
    format!("{cause}")
}

/// Deserialize an ExitCause from its stored variant name
fn exit_cause_from_string(s: &str) -> Result<ExitCause, StoreError> {
    serde_json::from_str(&format!("\"{s}\""))
        .map_err(|e| StoreError::SerializationError(format!("Unknown exit cause '{s}': {e}")))
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::SerializationError(format!("Failed to parse datetime '{s}': {e}")))
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn user_from_row(row: &SqliteRow) -> Result<User, StoreError> {
    let credential_key: Option<String> = row.get("credential_key");
    let to_migrate: i64 = row.get("to_migrate");

    Ok(User {
        db_id: row.get("db_id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        email: row.get("email"),
        credential_key: credential_key.filter(|k| !k.is_empty()),
        to_migrate: to_migrate != 0,
    })
}

fn account_from_row(row: &SqliteRow) -> Result<Account, StoreError> {
    Ok(Account {
        db_id: row.get("db_id"),
        account_id: row.get("account_id"),
        user_db_id: row.get("user_db_id"),
    })
}

fn drive_from_row(row: &SqliteRow) -> Result<Drive, StoreError> {
    let notifications_enabled: i64 = row.get("notifications_enabled");

    Ok(Drive {
        db_id: row.get("db_id"),
        drive_id: row.get("drive_id"),
        account_db_id: row.get("account_db_id"),
        name: row.get("name"),
        color: row.get("color"),
        notifications_enabled: notifications_enabled != 0,
        maintenance: false,
        access_denied: false,
    })
}

fn sync_from_row(row: &SqliteRow) -> Result<Sync, StoreError> {
    let local_path: String = row.get("local_path");
    let target_node_id: Option<String> = row.get("target_node_id");
    let mode_str: String = row.get("virtual_file_mode");
    let supports_virtual_files: i64 = row.get("supports_virtual_files");
    let paused: i64 = row.get("paused");

    let target_node_id = match target_node_id {
        Some(ref s) if !s.is_empty() => Some(NodeId::new(s.clone()).map_err(|e| {
            StoreError::SerializationError(format!("Invalid target node id '{s}': {e}"))
        })?),
        _ => None,
    };

    let virtual_file_mode = VfsMode::parse(&mode_str).ok_or_else(|| {
        StoreError::SerializationError(format!("Unknown virtual file mode '{mode_str}'"))
    })?;

    Ok(Sync {
        db_id: row.get("db_id"),
        drive_db_id: row.get("drive_db_id"),
        local_path: PathBuf::from(local_path),
        target_path: row.get("target_path"),
        target_node_id,
        supports_virtual_files: supports_virtual_files != 0,
        virtual_file_mode,
        navigation_pane_handle: row.get("navigation_pane_handle"),
        paused: paused != 0,
    })
}

fn error_from_row(row: &SqliteRow) -> Result<ErrorRecord, StoreError> {
    let time_str: String = row.get("time");
    let level_str: String = row.get("level");
    let exit_code_str: String = row.get("exit_code");
    let exit_cause_str: String = row.get("exit_cause");

    let level = ErrorLevel::parse(&level_str)
        .ok_or_else(|| StoreError::SerializationError(format!("Unknown level '{level_str}'")))?;

    Ok(ErrorRecord {
        db_id: row.get("db_id"),
        time: parse_datetime(&time_str)?,
        level,
        function_name: row.get("function_name"),
        sync_db_id: row.get("sync_db_id"),
        exit_code: exit_code_from_string(&exit_code_str)?,
        exit_cause: exit_cause_from_string(&exit_cause_str)?,
        local_path: row.get("local_path"),
        node_id: row.get("node_id"),
        message: row.get("message"),
    })
}

// ============================================================================
// User operations
// ============================================================================

impl SqliteStore {
    /// Inserts a user and returns its assigned db id
    pub async fn insert_user(&self, user: &User) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (user_id, name, email, credential_key, to_migrate) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.user_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.credential_key)
        .bind(user.to_migrate as i64)
        .execute(&self.pool)
        .await?;

        let db_id = result.last_insert_rowid();
        tracing::trace!(user_db_id = db_id, "Inserted user");
        Ok(db_id)
    }

    pub async fn get_user(&self, db_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE db_id = ?")
            .bind(db_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(user_from_row(r)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_remote_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(user_from_row(r)?)),
            None => Ok(None),
        }
    }

    pub async fn all_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY db_id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(user_from_row(row)?);
        }
        Ok(users)
    }

    pub async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET user_id = ?, name = ?, email = ?, credential_key = ?, \
             to_migrate = ? WHERE db_id = ?",
        )
        .bind(user.user_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.credential_key)
        .bind(user.to_migrate as i64)
        .bind(user.db_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes a user; its accounts, drives, syncs and node sets cascade
    pub async fn delete_user(&self, db_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE db_id = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await?;

        tracing::trace!(user_db_id = db_id, "Deleted user");
        Ok(())
    }

    /// User owning the given sync, resolved through drive and account
    pub async fn user_for_sync(&self, sync_db_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT u.* FROM users u \
             JOIN accounts a ON a.user_db_id = u.db_id \
             JOIN drives d ON d.account_db_id = a.db_id \
             JOIN syncs s ON s.drive_db_id = d.db_id \
             WHERE s.db_id = ?",
        )
        .bind(sync_db_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(user_from_row(r)?)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Account operations
// ============================================================================

impl SqliteStore {
    pub async fn insert_account(&self, account: &Account) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO accounts (account_id, user_db_id) VALUES (?, ?)")
            .bind(account.account_id)
            .bind(account.user_db_id)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_account(&self, db_id: i64) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE db_id = ?")
            .bind(db_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(account_from_row(r)?)),
            None => Ok(None),
        }
    }

    pub async fn accounts_for_user(&self, user_db_id: i64) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE user_db_id = ? ORDER BY db_id ASC")
            .bind(user_db_id)
            .fetch_all(&self.pool)
            .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in &rows {
            accounts.push(account_from_row(row)?);
        }
        Ok(accounts)
    }

    pub async fn delete_account(&self, db_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM accounts WHERE db_id = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await?;

        tracing::trace!(account_db_id = db_id, "Deleted account");
        Ok(())
    }

    /// Number of drives still attached to an account
    pub async fn drive_count_for_account(&self, account_db_id: i64) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM drives WHERE account_db_id = ?")
            .bind(account_db_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// ============================================================================
// Drive operations
// ============================================================================

impl SqliteStore {
    pub async fn insert_drive(&self, drive: &Drive) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO drives (drive_id, account_db_id, name, color, notifications_enabled) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(drive.drive_id)
        .bind(drive.account_db_id)
        .bind(&drive.name)
        .bind(&drive.color)
        .bind(drive.notifications_enabled as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_drive(&self, db_id: i64) -> Result<Option<Drive>, StoreError> {
        let row = sqlx::query("SELECT * FROM drives WHERE db_id = ?")
            .bind(db_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(drive_from_row(r)?)),
            None => Ok(None),
        }
    }

    pub async fn all_drives(&self) -> Result<Vec<Drive>, StoreError> {
        let rows = sqlx::query("SELECT * FROM drives ORDER BY db_id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut drives = Vec::with_capacity(rows.len());
        for row in &rows {
            drives.push(drive_from_row(row)?);
        }
        Ok(drives)
    }

    pub async fn update_drive(&self, drive: &Drive) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE drives SET drive_id = ?, account_db_id = ?, name = ?, color = ?, \
             notifications_enabled = ? WHERE db_id = ?",
        )
        .bind(drive.drive_id)
        .bind(drive.account_db_id)
        .bind(&drive.name)
        .bind(&drive.color)
        .bind(drive.notifications_enabled as i64)
        .bind(drive.db_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_drive(&self, db_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM drives WHERE db_id = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await?;

        tracing::trace!(drive_db_id = db_id, "Deleted drive");
        Ok(())
    }
}

// ============================================================================
// Sync operations
// ============================================================================

impl SqliteStore {
    pub async fn insert_sync(&self, sync: &Sync) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO syncs \
             (drive_db_id, local_path, target_path, target_node_id, \
              supports_virtual_files, virtual_file_mode, navigation_pane_handle, paused) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sync.drive_db_id)
        .bind(sync.local_path.display().to_string())
        .bind(&sync.target_path)
        .bind(sync.target_node_id.as_ref().map(|n| n.as_str().to_string()))
        .bind(sync.supports_virtual_files as i64)
        .bind(sync.virtual_file_mode.as_str())
        .bind(&sync.navigation_pane_handle)
        .bind(sync.paused as i64)
        .execute(&self.pool)
        .await?;

        let db_id = result.last_insert_rowid();
        tracing::trace!(sync_db_id = db_id, "Inserted sync");
        Ok(db_id)
    }

    pub async fn get_sync(&self, db_id: i64) -> Result<Option<Sync>, StoreError> {
        let row = sqlx::query("SELECT * FROM syncs WHERE db_id = ?")
            .bind(db_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(sync_from_row(r)?)),
            None => Ok(None),
        }
    }

    pub async fn all_syncs(&self) -> Result<Vec<Sync>, StoreError> {
        let rows = sqlx::query("SELECT * FROM syncs ORDER BY db_id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut syncs = Vec::with_capacity(rows.len());
        for row in &rows {
            syncs.push(sync_from_row(row)?);
        }
        Ok(syncs)
    }

    pub async fn syncs_for_drive(&self, drive_db_id: i64) -> Result<Vec<Sync>, StoreError> {
        let rows = sqlx::query("SELECT * FROM syncs WHERE drive_db_id = ? ORDER BY db_id ASC")
            .bind(drive_db_id)
            .fetch_all(&self.pool)
            .await?;

        let mut syncs = Vec::with_capacity(rows.len());
        for row in &rows {
            syncs.push(sync_from_row(row)?);
        }
        Ok(syncs)
    }

    pub async fn update_sync(&self, sync: &Sync) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE syncs SET drive_db_id = ?, local_path = ?, target_path = ?, \
             target_node_id = ?, supports_virtual_files = ?, virtual_file_mode = ?, \
             navigation_pane_handle = ?, paused = ? WHERE db_id = ?",
        )
        .bind(sync.drive_db_id)
        .bind(sync.local_path.display().to_string())
        .bind(&sync.target_path)
        .bind(sync.target_node_id.as_ref().map(|n| n.as_str().to_string()))
        .bind(sync.supports_virtual_files as i64)
        .bind(sync.virtual_file_mode.as_str())
        .bind(&sync.navigation_pane_handle)
        .bind(sync.paused as i64)
        .bind(sync.db_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_sync(&self, db_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM syncs WHERE db_id = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await?;

        tracing::trace!(sync_db_id = db_id, "Deleted sync");
        Ok(())
    }
}

// ============================================================================
// Node-set operations
// ============================================================================

impl SqliteStore {
    /// Loads one of a sync's node sets
    pub async fn node_set(
        &self,
        sync_db_id: i64,
        kind: NodeSetKind,
    ) -> Result<HashSet<NodeId>, StoreError> {
        let rows = sqlx::query(
            "SELECT node_id FROM sync_nodes WHERE sync_db_id = ? AND set_kind = ?",
        )
        .bind(sync_db_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut set = HashSet::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("node_id");
            set.insert(NodeId::new(id.clone()).map_err(|e| {
                StoreError::SerializationError(format!("Invalid stored node id '{id}': {e}"))
            })?);
        }
        Ok(set)
    }

    /// Replaces one of a sync's node sets atomically
    pub async fn set_node_set(
        &self,
        sync_db_id: i64,
        kind: NodeSetKind,
        nodes: &HashSet<NodeId>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sync_nodes WHERE sync_db_id = ? AND set_kind = ?")
            .bind(sync_db_id)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;

        for node in nodes {
            sqlx::query("INSERT INTO sync_nodes (sync_db_id, node_id, set_kind) VALUES (?, ?, ?)")
                .bind(sync_db_id)
                .bind(node.as_str())
                .bind(kind.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::trace!(
            sync_db_id,
            kind = %kind,
            count = nodes.len(),
            "Replaced node set"
        );
        Ok(())
    }

    /// Drops all three node sets of a sync
    pub async fn clear_node_sets(&self, sync_db_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_nodes WHERE sync_db_id = ?")
            .bind(sync_db_id)
            .execute(&self.pool)
            .await?;

        tracing::trace!(sync_db_id, "Cleared node sets");
        Ok(())
    }
}

// ============================================================================
// Error operations
// ============================================================================

impl SqliteStore {
    pub async fn insert_error(&self, record: &ErrorRecord) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO errors \
             (time, level, function_name, sync_db_id, exit_code, exit_cause, \
              local_path, node_id, message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.time.to_rfc3339())
        .bind(record.level.as_str())
        .bind(&record.function_name)
        .bind(record.sync_db_id)
        .bind(exit_code_to_string(record.exit_code))
        .bind(exit_cause_to_string(record.exit_cause))
        .bind(&record.local_path)
        .bind(&record.node_id)
        .bind(&record.message)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Refreshes the timestamp of an existing record (deduplicated insert)
    pub async fn refresh_error_time(
        &self,
        db_id: i64,
        time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE errors SET time = ? WHERE db_id = ?")
            .bind(time.to_rfc3339())
            .bind(db_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// All server-level records, oldest first
    pub async fn server_errors(&self) -> Result<Vec<ErrorRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM errors WHERE level = 'server' ORDER BY time ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(error_from_row(row)?);
        }
        Ok(records)
    }

    /// Sync- and node-level records attached to one sync, oldest first
    pub async fn errors_for_sync(&self, sync_db_id: i64) -> Result<Vec<ErrorRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM errors WHERE sync_db_id = ? AND level != 'server' ORDER BY time ASC",
        )
        .bind(sync_db_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(error_from_row(row)?);
        }
        Ok(records)
    }

    pub async fn delete_error(&self, db_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM errors WHERE db_id = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_server_errors(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM errors WHERE level = 'server'")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_errors_for_sync(&self, sync_db_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM errors WHERE sync_db_id = ? AND level != 'server'")
            .bind(sync_db_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drops records of one sync carrying the given cause. Used to prune
    /// stale file-access errors whose path has become readable again.
    pub async fn delete_errors_with_cause(
        &self,
        sync_db_id: i64,
        cause: ExitCause,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM errors WHERE sync_db_id = ? AND exit_cause = ?")
            .bind(sync_db_id)
            .bind(exit_cause_to_string(cause))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// App-state operations
// ============================================================================

impl SqliteStore {
    /// Creates every missing key with its default value. Existing values
    /// are left untouched, so this is safe to run on every startup.
    pub async fn init_app_state(&self) -> Result<(), StoreError> {
        for key in AppStateKey::ALL {
            sqlx::query("INSERT OR IGNORE INTO app_state (key, value) VALUES (?, ?)")
                .bind(key.as_str())
                .bind(key.default_value())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn app_state_value(&self, key: AppStateKey) -> Result<String, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        value.ok_or_else(|| StoreError::NotFound(format!("app_state key '{}'", key.as_str())))
    }

    pub async fn set_app_state_value(
        &self,
        key: AppStateKey,
        value: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_state (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
