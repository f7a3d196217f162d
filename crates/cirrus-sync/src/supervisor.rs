//! Per-sync reconciliation supervisor
//!
//! One supervisor per configured sync. Starting spawns a tick loop that
//! performs a reconciliation pass every interval; the loop is cancelled on
//! stop or pause through a `CancellationToken`. Status transitions:
//!
//! ```text
//! Undefined -> Starting -> Idle <-> Running
//!                  |          \-> Paused -> Idle (resume)
//!                  \-> Error
//! anything  -> Stopped (stop)
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cirrus_core::domain::{NodeId, NodeSetKind, Sync, SyncStatus};
use cirrus_core::ports::{StopOptions, SyncSupervisor};
use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};
use cirrus_store::SqliteStore;

/// The per-sync reconciliation state machine.
pub struct Supervisor {
    sync: Sync,
    store: SqliteStore,
    tick_interval: Duration,
    status: Arc<Mutex<SyncStatus>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Supervisor {
    pub fn new(sync: Sync, store: SqliteStore, tick_interval: Duration) -> Self {
        Self {
            sync,
            store,
            tick_interval,
            status: Arc::new(Mutex::new(SyncStatus::Undefined)),
            cancel: Mutex::new(None),
        }
    }

    fn set_status(&self, status: SyncStatus) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status;
        }
    }

    fn spawn_loop(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let status = Arc::clone(&self.status);
        let store = self.store.clone();
        let sync = self.sync.clone();
        let interval = self.tick_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        tracing::debug!(sync_db_id = sync.db_id, "Supervisor loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Ok(mut guard) = status.lock() {
                            *guard = SyncStatus::Running;
                        }
                        let outcome = run_pass(&store, &sync).await;
                        if let Ok(mut guard) = status.lock() {
                            *guard = match outcome {
                                Ok(()) => SyncStatus::Idle,
                                Err(_) => SyncStatus::Error,
                            };
                        }
                    }
                }
            }
        });
        token
    }

    fn cancel_loop(&self) {
        if let Ok(mut guard) = self.cancel.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
    }

    fn loop_active(&self) -> bool {
        self.cancel
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }
}

/// One reconciliation pass.
///
/// Verifies the local folder is still reachable and prunes file-access
/// error records whose path has become readable again. The content diff
/// itself runs against the remote backend and is elided while the sync is
/// otherwise healthy.
async fn run_pass(store: &SqliteStore, sync: &Sync) -> ExitResult {
    if !sync.local_path.is_dir() {
        tracing::warn!(
            sync_db_id = sync.db_id,
            path = %sync.local_path.display(),
            "Sync folder disappeared"
        );
        return Err(ExitInfo::new(
            ExitCode::SystemError,
            ExitCause::SyncDirDoesntExist,
        ));
    }

    let errors = store
        .errors_for_sync(sync.db_id)
        .await
        .map_err(|_| ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError))?;
    for record in errors {
        if record.exit_cause != ExitCause::FileAccessError {
            continue;
        }
        let readable = record
            .local_path
            .as_deref()
            .map(|p| std::path::Path::new(p).exists())
            .unwrap_or(false);
        if readable {
            tracing::info!(
                sync_db_id = sync.db_id,
                error_db_id = record.db_id,
                "Pruning stale file access error"
            );
            store
                .delete_error(record.db_id)
                .await
                .map_err(|_| ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError))?;
        }
    }
    Ok(())
}

#[async_trait]
impl SyncSupervisor for Supervisor {
    fn sync_db_id(&self) -> i64 {
        self.sync.db_id
    }

    async fn start(&self) -> ExitResult {
        if self.loop_active() {
            return Ok(());
        }
        self.set_status(SyncStatus::Starting);

        if !self.sync.local_path.is_dir() {
            self.set_status(SyncStatus::Error);
            return Err(ExitInfo::new(
                ExitCode::SystemError,
                ExitCause::SyncDirDoesntExist,
            ));
        }

        let token = self.spawn_loop();
        if let Ok(mut guard) = self.cancel.lock() {
            *guard = Some(token);
        }
        self.set_status(SyncStatus::Idle);
        tracing::info!(sync_db_id = self.sync.db_id, "Supervisor started");
        Ok(())
    }

    async fn stop(&self, opts: StopOptions) -> ExitResult {
        self.cancel_loop();
        if opts.clear {
            self.clear_nodes().await?;
        }
        self.set_status(SyncStatus::Stopped);
        tracing::info!(
            sync_db_id = self.sync.db_id,
            paused_by_user = opts.paused_by_user,
            quit = opts.quit,
            clear = opts.clear,
            "Supervisor stopped"
        );
        Ok(())
    }

    async fn pause(&self) -> ExitResult {
        self.cancel_loop();
        self.set_status(SyncStatus::Paused);
        Ok(())
    }

    async fn resume(&self) -> ExitResult {
        if self.loop_active() {
            return Ok(());
        }
        let token = self.spawn_loop();
        if let Ok(mut guard) = self.cancel.lock() {
            *guard = Some(token);
        }
        self.set_status(SyncStatus::Idle);
        Ok(())
    }

    fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .map(|g| *g)
            .unwrap_or(SyncStatus::Undefined)
    }

    async fn set_node_set(&self, kind: NodeSetKind, nodes: HashSet<NodeId>) -> ExitResult {
        self.store
            .set_node_set(self.sync.db_id, kind, &nodes)
            .await
            .map_err(|e| {
                tracing::error!(sync_db_id = self.sync.db_id, error = %e, "Node set update failed");
                ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError)
            })
    }

    async fn wipe_virtual_files(&self) -> ExitResult {
        cirrus_vfs::wipe_placeholders(&self.sync.local_path)
    }

    async fn clear_nodes(&self) -> ExitResult {
        self.store
            .clear_node_sets(self.sync.db_id)
            .await
            .map_err(|_| ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_core::domain::VfsMode;
    use cirrus_store::DatabasePool;
    use std::path::PathBuf;

    async fn store() -> SqliteStore {
        let pool = DatabasePool::in_memory().await.unwrap();
        SqliteStore::new(pool.pool().clone())
    }

    fn sync_at(db_id: i64, path: PathBuf) -> Sync {
        Sync {
            db_id,
            drive_db_id: 1,
            local_path: path,
            target_path: "/Remote".to_string(),
            target_node_id: None,
            supports_virtual_files: false,
            virtual_file_mode: VfsMode::Off,
            navigation_pane_handle: None,
            paused: false,
        }
    }

    #[tokio::test]
    async fn test_start_fails_on_missing_folder() {
        let supervisor = Supervisor::new(
            sync_at(1, PathBuf::from("/nonexistent/cirrus")),
            store().await,
            Duration::from_secs(30),
        );
        let err = supervisor.start().await.unwrap_err();
        assert_eq!(err.cause, ExitCause::SyncDirDoesntExist);
        assert_eq!(supervisor.status(), SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_lifecycle_start_pause_resume_stop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(
            sync_at(1, dir.path().to_path_buf()),
            store().await,
            Duration::from_secs(30),
        );

        supervisor.start().await.unwrap();
        assert!(supervisor.is_running());
        // Idempotent
        supervisor.start().await.unwrap();

        supervisor.pause().await.unwrap();
        assert_eq!(supervisor.status(), SyncStatus::Paused);
        assert!(!supervisor.is_running());

        supervisor.resume().await.unwrap();
        assert!(supervisor.is_running());

        supervisor.stop(StopOptions::default()).await.unwrap();
        assert_eq!(supervisor.status(), SyncStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_with_clear_drops_node_sets() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().await;
        let supervisor = Supervisor::new(
            sync_at(7, dir.path().to_path_buf()),
            store.clone(),
            Duration::from_secs(30),
        );

        let nodes: HashSet<NodeId> = [NodeId::new("n1").unwrap()].into_iter().collect();
        supervisor
            .set_node_set(NodeSetKind::BlackList, nodes)
            .await
            .unwrap();
        assert_eq!(
            store.node_set(7, NodeSetKind::BlackList).await.unwrap().len(),
            1
        );

        supervisor
            .stop(StopOptions {
                clear: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(store
            .node_set(7, NodeSetKind::BlackList)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_pass_prunes_recovered_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().await;
        let readable = dir.path().join("back.txt");
        std::fs::write(&readable, b"x").unwrap();

        let recovered = cirrus_core::domain::ErrorRecord::sync(
            3,
            "executor",
            ExitCode::SystemError,
            ExitCause::FileAccessError,
        )
        .with_path(readable.display().to_string());
        store.insert_error(&recovered).await.unwrap();

        let still_gone = cirrus_core::domain::ErrorRecord::sync(
            3,
            "executor",
            ExitCode::SystemError,
            ExitCause::FileAccessError,
        )
        .with_path(dir.path().join("gone.txt").display().to_string());
        store.insert_error(&still_gone).await.unwrap();

        let sync = sync_at(3, dir.path().to_path_buf());
        run_pass(&store, &sync).await.unwrap();

        let remaining = store.errors_for_sync(3).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0]
            .local_path
            .as_deref()
            .unwrap()
            .ends_with("gone.txt"));
    }

    #[tokio::test]
    async fn test_wipe_virtual_files_restores_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"data").unwrap();

        // Convert manually through the vfs crate, then wipe via the port
        let adapter = cirrus_vfs::SuffixVfs::new(cirrus_core::ports::VfsSetupParams {
            sync_db_id: 1,
            local_path: dir.path().to_path_buf(),
            target_path: "/Remote".to_string(),
            mode: VfsMode::Suffix,
        });
        use cirrus_core::ports::VfsAdapter;
        adapter.convert_dir_to_placeholders(dir.path()).await.unwrap();
        assert!(!file.exists());

        let supervisor = Supervisor::new(
            sync_at(1, dir.path().to_path_buf()),
            store().await,
            Duration::from_secs(30),
        );
        supervisor.wipe_virtual_files().await.unwrap();
        assert!(file.exists());
    }
}
