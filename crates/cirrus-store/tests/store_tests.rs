//! Integration tests for SqliteStore
//!
//! These tests verify the repository against an in-memory SQLite database.
//! Each test function creates a fresh database to ensure test isolation.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{Duration, Utc};

use cirrus_core::domain::{
    Account, AppStateKey, Drive, ErrorRecord, NodeId, NodeSetKind, Sync, User, VfsMode,
};
use cirrus_core::{ExitCause, ExitCode};
use cirrus_store::{DatabasePool, SqliteStore};

// ============================================================================
// Test helpers
// ============================================================================

/// Create a fresh in-memory store for each test
async fn setup() -> SqliteStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStore::new(pool.pool().clone())
}

async fn create_test_user(store: &SqliteStore) -> User {
    let mut user = User {
        db_id: 0,
        user_id: 42,
        name: "Test User".to_string(),
        email: "test@example.com".to_string(),
        credential_key: Some("cirrus-user-42".to_string()),
        to_migrate: false,
    };
    user.db_id = store.insert_user(&user).await.unwrap();
    user
}

async fn create_test_drive(store: &SqliteStore, user_db_id: i64) -> Drive {
    let mut account = Account {
        db_id: 0,
        account_id: 7,
        user_db_id,
    };
    account.db_id = store.insert_account(&account).await.unwrap();

    let mut drive = Drive::new(0, 100, account.db_id, "Work");
    drive.db_id = store.insert_drive(&drive).await.unwrap();
    drive
}

async fn create_test_sync(store: &SqliteStore, drive_db_id: i64, path: &str) -> Sync {
    let mut sync = Sync {
        db_id: 0,
        drive_db_id,
        local_path: PathBuf::from(path),
        target_path: "/Remote".to_string(),
        target_node_id: Some(NodeId::new("root-node").unwrap()),
        supports_virtual_files: false,
        virtual_file_mode: VfsMode::Off,
        navigation_pane_handle: None,
        paused: false,
    };
    sync.db_id = store.insert_sync(&sync).await.unwrap();
    sync
}

// ============================================================================
// User and hierarchy tests
// ============================================================================

#[tokio::test]
async fn test_insert_and_get_user() {
    let store = setup().await;
    let user = create_test_user(&store).await;

    let retrieved = store.get_user(user.db_id).await.unwrap().unwrap();
    assert_eq!(retrieved, user);

    let by_remote = store.get_user_by_remote_id(42).await.unwrap().unwrap();
    assert_eq!(by_remote.db_id, user.db_id);
}

#[tokio::test]
async fn test_update_user_clears_credential_key() {
    let store = setup().await;
    let mut user = create_test_user(&store).await;

    user.credential_key = None;
    store.update_user(&user).await.unwrap();

    let retrieved = store.get_user(user.db_id).await.unwrap().unwrap();
    assert!(!retrieved.is_connected());
}

#[tokio::test]
async fn test_delete_user_cascades_to_syncs() {
    let store = setup().await;
    let user = create_test_user(&store).await;
    let drive = create_test_drive(&store, user.db_id).await;
    let sync = create_test_sync(&store, drive.db_id, "/home/u/drive").await;

    let nodes: HashSet<NodeId> = [NodeId::new("n1").unwrap()].into_iter().collect();
    store
        .set_node_set(sync.db_id, NodeSetKind::BlackList, &nodes)
        .await
        .unwrap();

    store.delete_user(user.db_id).await.unwrap();

    assert!(store.get_drive(drive.db_id).await.unwrap().is_none());
    assert!(store.get_sync(sync.db_id).await.unwrap().is_none());
    let black = store
        .node_set(sync.db_id, NodeSetKind::BlackList)
        .await
        .unwrap();
    assert!(black.is_empty());
}

#[tokio::test]
async fn test_user_for_sync_resolves_hierarchy() {
    let store = setup().await;
    let user = create_test_user(&store).await;
    let drive = create_test_drive(&store, user.db_id).await;
    let sync = create_test_sync(&store, drive.db_id, "/home/u/drive").await;

    let owner = store.user_for_sync(sync.db_id).await.unwrap().unwrap();
    assert_eq!(owner.db_id, user.db_id);

    assert!(store.user_for_sync(9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_drive_count_for_account() {
    let store = setup().await;
    let user = create_test_user(&store).await;
    let drive = create_test_drive(&store, user.db_id).await;

    let count = store
        .drive_count_for_account(drive.account_db_id)
        .await
        .unwrap();
    assert_eq!(count, 1);

    store.delete_drive(drive.db_id).await.unwrap();
    let count = store
        .drive_count_for_account(drive.account_db_id)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

// ============================================================================
// Sync tests
// ============================================================================

#[tokio::test]
async fn test_sync_roundtrip_with_vfs_fields() {
    let store = setup().await;
    let user = create_test_user(&store).await;
    let drive = create_test_drive(&store, user.db_id).await;

    let mut sync = create_test_sync(&store, drive.db_id, "/home/u/drive").await;
    sync.supports_virtual_files = true;
    sync.virtual_file_mode = VfsMode::Suffix;
    sync.paused = true;
    store.update_sync(&sync).await.unwrap();

    let retrieved = store.get_sync(sync.db_id).await.unwrap().unwrap();
    assert_eq!(retrieved.virtual_file_mode, VfsMode::Suffix);
    assert!(retrieved.supports_virtual_files);
    assert!(retrieved.paused);
    assert_eq!(retrieved.target_node_id, sync.target_node_id);
}

#[tokio::test]
async fn test_syncs_for_drive() {
    let store = setup().await;
    let user = create_test_user(&store).await;
    let drive = create_test_drive(&store, user.db_id).await;
    create_test_sync(&store, drive.db_id, "/home/u/a").await;
    create_test_sync(&store, drive.db_id, "/home/u/b").await;

    let syncs = store.syncs_for_drive(drive.db_id).await.unwrap();
    assert_eq!(syncs.len(), 2);
    assert_eq!(store.all_syncs().await.unwrap().len(), 2);
}

// ============================================================================
// Node-set tests
// ============================================================================

#[tokio::test]
async fn test_node_set_replacement_is_atomic() {
    let store = setup().await;
    let user = create_test_user(&store).await;
    let drive = create_test_drive(&store, user.db_id).await;
    let sync = create_test_sync(&store, drive.db_id, "/home/u/drive").await;

    let first: HashSet<NodeId> = ["a", "b"]
        .iter()
        .map(|s| NodeId::new(*s).unwrap())
        .collect();
    store
        .set_node_set(sync.db_id, NodeSetKind::BlackList, &first)
        .await
        .unwrap();

    let second: HashSet<NodeId> = ["c"].iter().map(|s| NodeId::new(*s).unwrap()).collect();
    store
        .set_node_set(sync.db_id, NodeSetKind::BlackList, &second)
        .await
        .unwrap();

    let black = store
        .node_set(sync.db_id, NodeSetKind::BlackList)
        .await
        .unwrap();
    assert_eq!(black, second);
}

#[tokio::test]
async fn test_node_sets_are_independent_per_kind() {
    let store = setup().await;
    let user = create_test_user(&store).await;
    let drive = create_test_drive(&store, user.db_id).await;
    let sync = create_test_sync(&store, drive.db_id, "/home/u/drive").await;

    let black: HashSet<NodeId> = [NodeId::new("b1").unwrap()].into_iter().collect();
    let white: HashSet<NodeId> = [NodeId::new("w1").unwrap()].into_iter().collect();
    store
        .set_node_set(sync.db_id, NodeSetKind::BlackList, &black)
        .await
        .unwrap();
    store
        .set_node_set(sync.db_id, NodeSetKind::WhiteList, &white)
        .await
        .unwrap();

    assert_eq!(
        store
            .node_set(sync.db_id, NodeSetKind::BlackList)
            .await
            .unwrap(),
        black
    );
    assert_eq!(
        store
            .node_set(sync.db_id, NodeSetKind::WhiteList)
            .await
            .unwrap(),
        white
    );

    store.clear_node_sets(sync.db_id).await.unwrap();
    assert!(store
        .node_set(sync.db_id, NodeSetKind::WhiteList)
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Error tests
// ============================================================================

#[tokio::test]
async fn test_error_roundtrip() {
    let store = setup().await;

    let record = ErrorRecord::server("open_store", ExitCode::DbError, ExitCause::DbAccessError)
        .with_message("disk full");
    let db_id = store.insert_error(&record).await.unwrap();

    let errors = store.server_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].db_id, db_id);
    assert_eq!(errors[0].exit_code, ExitCode::DbError);
    assert_eq!(errors[0].exit_cause, ExitCause::DbAccessError);
    assert_eq!(errors[0].message, "disk full");
}

#[tokio::test]
async fn test_refresh_error_time() {
    let store = setup().await;

    let record = ErrorRecord::sync(3, "start", ExitCode::NetworkError, ExitCause::HttpErr);
    let db_id = store.insert_error(&record).await.unwrap();

    let later = Utc::now() + Duration::seconds(60);
    store.refresh_error_time(db_id, later).await.unwrap();

    let errors = store.errors_for_sync(3).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].time.timestamp(), later.timestamp());
}

#[tokio::test]
async fn test_delete_errors_scoped_by_level() {
    let store = setup().await;

    store
        .insert_error(&ErrorRecord::server(
            "watchdog",
            ExitCode::FatalError,
            ExitCause::Unknown,
        ))
        .await
        .unwrap();
    store
        .insert_error(&ErrorRecord::sync(
            5,
            "executor",
            ExitCode::SystemError,
            ExitCause::FileAccessError,
        ))
        .await
        .unwrap();

    store.delete_server_errors().await.unwrap();
    assert!(store.server_errors().await.unwrap().is_empty());
    assert_eq!(store.errors_for_sync(5).await.unwrap().len(), 1);

    store.delete_errors_for_sync(5).await.unwrap();
    assert!(store.errors_for_sync(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_errors_with_cause() {
    let store = setup().await;

    store
        .insert_error(
            &ErrorRecord::sync(
                5,
                "executor",
                ExitCode::SystemError,
                ExitCause::FileAccessError,
            )
            .with_path("/home/u/drive/locked.txt"),
        )
        .await
        .unwrap();
    store
        .insert_error(&ErrorRecord::sync(
            5,
            "executor",
            ExitCode::NetworkError,
            ExitCause::HttpErr,
        ))
        .await
        .unwrap();

    store
        .delete_errors_with_cause(5, ExitCause::FileAccessError)
        .await
        .unwrap();

    let remaining = store.errors_for_sync(5).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].exit_cause, ExitCause::HttpErr);
}

// ============================================================================
// App-state tests
// ============================================================================

#[tokio::test]
async fn test_app_state_init_is_idempotent() {
    let store = setup().await;

    store.init_app_state().await.unwrap();
    store
        .set_app_state_value(AppStateKey::AppUid, "uid-123")
        .await
        .unwrap();

    // Second init must not reset existing values
    store.init_app_state().await.unwrap();

    let uid = store.app_state_value(AppStateKey::AppUid).await.unwrap();
    assert_eq!(uid, "uid-123");

    let restart = store
        .app_state_value(AppStateKey::LastServerSelfRestartDate)
        .await
        .unwrap();
    assert_eq!(restart, "0");
}

#[tokio::test]
async fn test_app_state_set_overwrites() {
    let store = setup().await;
    store.init_app_state().await.unwrap();

    store
        .set_app_state_value(AppStateKey::LogUploadPercent, "42")
        .await
        .unwrap();
    let percent = store
        .app_state_value(AppStateKey::LogUploadPercent)
        .await
        .unwrap();
    assert_eq!(percent, "42");
}
