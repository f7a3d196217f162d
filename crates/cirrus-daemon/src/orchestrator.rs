//! The process-wide orchestrator
//!
//! Single owner of the registries mapping `sync_db_id` to its supervisor
//! and its virtual-filesystem adapter. At most one of each exists per
//! sync; the registry is checked before every construction. The
//! orchestrator is owned exclusively by the dispatch task, so the
//! registries are plain maps without locking.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use cirrus_core::domain::{
    ErrorLevel, ErrorRecord, NodeId, NodeSetKind, Sync, SyncStatus, VfsMode,
};
use cirrus_core::ports::{
    ErrorTelemetry, StopOptions, SupervisorFactory, SyncSupervisor, VfsAdapter, VfsFactory,
    VfsSetupParams, VirtualizationProbe,
};
use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};
use cirrus_ipc::Signal;
use cirrus_jobs::JobPool;
use cirrus_store::{SqliteStore, StoreError};

use crate::maintenance::KEYRING_SERVICE;

fn db_error(e: StoreError) -> ExitInfo {
    warn!(error = %e, "Store access failed");
    ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError)
}

pub struct Orchestrator {
    store: SqliteStore,
    supervisors: HashMap<i64, Arc<dyn SyncSupervisor>>,
    adapters: HashMap<i64, Arc<dyn VfsAdapter>>,
    supervisor_factory: Arc<dyn SupervisorFactory>,
    vfs_factory: Arc<dyn VfsFactory>,
    probe: Arc<dyn VirtualizationProbe>,
    telemetry: Arc<dyn ErrorTelemetry>,
    jobs: JobPool,
    signals: broadcast::Sender<Signal>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SqliteStore,
        supervisor_factory: Arc<dyn SupervisorFactory>,
        vfs_factory: Arc<dyn VfsFactory>,
        probe: Arc<dyn VirtualizationProbe>,
        telemetry: Arc<dyn ErrorTelemetry>,
        jobs: JobPool,
        signals: broadcast::Sender<Signal>,
    ) -> Self {
        Self {
            store,
            supervisors: HashMap::new(),
            adapters: HashMap::new(),
            supervisor_factory,
            vfs_factory,
            probe,
            telemetry,
            jobs,
            signals,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn jobs(&self) -> &JobPool {
        &self.jobs
    }

    /// Publishes a signal to every connected client. A send failure only
    /// means nobody is connected right now.
    pub fn signal(&self, signal: Signal) {
        let _ = self.signals.send(signal);
    }

    pub fn supervisor(&self, sync_db_id: i64) -> Option<&Arc<dyn SyncSupervisor>> {
        self.supervisors.get(&sync_db_id)
    }

    pub fn adapter(&self, sync_db_id: i64) -> Option<&Arc<dyn VfsAdapter>> {
        self.adapters.get(&sync_db_id)
    }

    pub fn supervisor_count(&self) -> usize {
        self.supervisors.len()
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Status of every registered supervisor.
    pub fn sync_statuses(&self) -> Vec<(i64, SyncStatus)> {
        self.supervisors
            .iter()
            .map(|(id, sup)| (*id, sup.status()))
            .collect()
    }

    // ========================================================================
    // Sync lifecycle
    // ========================================================================

    /// Rejects a sync whose local folder nests inside, or around, another
    /// sync's local folder.
    async fn check_sync_validity(&self, sync: &Sync) -> ExitResult {
        let all = self.store.all_syncs().await.map_err(db_error)?;
        for other in all.iter().filter(|o| o.db_id != sync.db_id) {
            if sync.overlaps(other) {
                warn!(
                    sync_db_id = sync.db_id,
                    other_db_id = other.db_id,
                    local_path = %sync.local_path.display(),
                    "Sync folders nest"
                );
                return Err(ExitInfo::new(
                    ExitCode::InvalidSync,
                    ExitCause::SyncDirNestingError,
                ));
            }
        }
        Ok(())
    }

    /// Creates and starts the sync's adapter unless one is registered.
    async fn try_create_and_start_vfs(&mut self, sync: &Sync) -> ExitResult {
        if self.adapters.contains_key(&sync.db_id) {
            return Ok(());
        }
        let params = VfsSetupParams {
            sync_db_id: sync.db_id,
            local_path: sync.local_path.clone(),
            target_path: sync.target_path.clone(),
            mode: sync.virtual_file_mode,
        };
        let adapter = self.vfs_factory.create(params)?;
        adapter.start().await?;
        self.adapters.insert(sync.db_id, adapter);
        Ok(())
    }

    /// Registers the sync's supervisor unless one exists already.
    async fn init_supervisor(&mut self, sync: &Sync) -> ExitResult<Arc<dyn SyncSupervisor>> {
        if let Some(existing) = self.supervisors.get(&sync.db_id) {
            return Ok(Arc::clone(existing));
        }
        let supervisor = self.supervisor_factory.create(sync).await?;
        self.supervisors.insert(sync.db_id, Arc::clone(&supervisor));
        Ok(supervisor)
    }

    async fn set_paused_flag(&self, sync: &Sync, paused: bool) {
        let mut updated = sync.clone();
        updated.paused = paused;
        if let Err(e) = self.store.update_sync(&updated).await {
            error!(sync_db_id = sync.db_id, error = %e, "Paused flag update failed");
        }
    }

    /// Validates and starts one sync: nesting check, adapter, supervisor.
    ///
    /// An adapter failure degrades rather than aborts: the error is
    /// recorded, the sync is paused and its supervisor stays registered
    /// but unstarted. The returned info merges the adapter and supervisor
    /// outcomes, first failure wins.
    pub async fn start_sync(&mut self, sync_db_id: i64) -> ExitInfo {
        let sync = match self.store.get_sync(sync_db_id).await {
            Ok(Some(sync)) => sync,
            Ok(None) => {
                warn!(sync_db_id, "Start requested for unknown sync");
                return ExitInfo::new(ExitCode::DataError, ExitCause::DbEntryNotFound);
            }
            Err(e) => return db_error(e),
        };

        if let Err(info) = self.check_sync_validity(&sync).await {
            self.add_error(
                ErrorRecord::sync(sync_db_id, "start_sync", info.code, info.cause)
                    .with_path(sync.local_path.to_string_lossy()),
            )
            .await;
            return info;
        }

        let mut merged = ExitInfo::OK;
        let degraded = match self.try_create_and_start_vfs(&sync).await {
            Ok(()) => false,
            Err(info) => {
                self.add_error(
                    ErrorRecord::sync(sync_db_id, "start_sync", info.code, info.cause)
                        .with_path(sync.local_path.to_string_lossy())
                        .with_message("Virtual filesystem start failed"),
                )
                .await;
                self.set_paused_flag(&sync, true).await;
                merged = merged.merge(info);
                true
            }
        };

        let supervisor = match self.init_supervisor(&sync).await {
            Ok(supervisor) => supervisor,
            Err(info) => {
                self.add_error(ErrorRecord::sync(
                    sync_db_id,
                    "start_sync",
                    info.code,
                    info.cause,
                ))
                .await;
                return merged.merge(info);
            }
        };

        if degraded {
            info!(sync_db_id, "Sync degraded, supervisor left unstarted");
            return merged;
        }

        if let Err(info) = supervisor.start().await {
            self.add_error(
                ErrorRecord::sync(sync_db_id, "start_sync", info.code, info.cause)
                    .with_path(sync.local_path.to_string_lossy()),
            )
            .await;
            self.set_paused_flag(&sync, true).await;
            merged = merged.merge(info);
        } else {
            info!(sync_db_id, "Sync started");
        }
        merged
    }

    /// Stops a sync at the user's request. The adapter is released; the
    /// supervisor stays registered so a later start resumes cheaply.
    pub async fn stop_sync(&mut self, sync_db_id: i64, opts: StopOptions) -> ExitInfo {
        let Some(supervisor) = self.supervisors.get(&sync_db_id).map(Arc::clone) else {
            debug!(sync_db_id, "Stop requested for unregistered sync");
            return ExitInfo::new(ExitCode::DataError, ExitCause::DbEntryNotFound);
        };

        // The adapter leaves the registry before anything is asked to
        // stop, so no request can be dispatched against it mid-teardown.
        let adapter = self.adapters.remove(&sync_db_id);

        let mut merged = ExitInfo::OK;
        if let Err(info) = supervisor.stop(opts).await {
            merged = merged.merge(info);
        }
        if let Some(adapter) = adapter {
            if let Err(info) = adapter.stop(false).await {
                merged = merged.merge(info);
            }
        }

        if opts.paused_by_user {
            if let Ok(Some(sync)) = self.store.get_sync(sync_db_id).await {
                self.set_paused_flag(&sync, true).await;
            }
        }
        info!(sync_db_id, "Sync stopped");
        merged
    }

    /// Full teardown: supervisor stopped with `clear`, adapter stopped
    /// with unregister, both registry entries removed.
    pub async fn stop_sync_task(&mut self, sync_db_id: i64) -> ExitInfo {
        let supervisor = self.supervisors.remove(&sync_db_id);
        let adapter = self.adapters.remove(&sync_db_id);

        let mut merged = ExitInfo::OK;
        if let Some(supervisor) = supervisor {
            let opts = StopOptions {
                clear: true,
                ..StopOptions::default()
            };
            if let Err(info) = supervisor.stop(opts).await {
                merged = merged.merge(info);
            }
        }
        if let Some(adapter) = adapter {
            if let Err(info) = adapter.stop(true).await {
                merged = merged.merge(info);
            }
        }
        debug!(sync_db_id, "Sync torn down");
        merged
    }

    // ========================================================================
    // Sync creation and deletion
    // ========================================================================

    /// Persists a new sync row and announces it. Validation and startup
    /// run later as a deferred task so the caller's reply is never blocked
    /// by filesystem work.
    ///
    /// # Errors
    /// Fails when the drive does not exist or the row cannot be written.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_sync(
        &mut self,
        drive_db_id: i64,
        local_path: PathBuf,
        target_path: String,
        target_node_id: Option<NodeId>,
        black_list: HashSet<NodeId>,
        white_list: HashSet<NodeId>,
    ) -> ExitResult<i64> {
        if self
            .store
            .get_drive(drive_db_id)
            .await
            .map_err(db_error)?
            .is_none()
        {
            return Err(ExitInfo::new(ExitCode::DataError, ExitCause::DbEntryNotFound));
        }

        let existing = self.store.all_syncs().await.map_err(db_error)?;
        let local_path = crate::paths::find_good_path_for_new_sync(&local_path, &existing);

        let sync = Sync {
            db_id: 0,
            drive_db_id,
            local_path,
            target_path,
            target_node_id,
            supports_virtual_files: false,
            virtual_file_mode: VfsMode::Off,
            navigation_pane_handle: None,
            paused: false,
        };
        let sync_db_id = self.store.insert_sync(&sync).await.map_err(db_error)?;

        self.store
            .set_node_set(sync_db_id, NodeSetKind::BlackList, &black_list)
            .await
            .map_err(db_error)?;
        self.store
            .set_node_set(sync_db_id, NodeSetKind::WhiteList, &white_list)
            .await
            .map_err(db_error)?;

        info!(sync_db_id, drive_db_id, "Sync added");
        self.signal(Signal::SyncAdded { sync_db_id });
        Ok(sync_db_id)
    }

    /// Deferred tail of [`add_sync`]: validate and start; a validation or
    /// database failure rolls the new sync back entirely.
    pub async fn finish_add_sync(&mut self, sync_db_id: i64) {
        let info = self.start_sync(sync_db_id).await;
        if matches!(info.code, ExitCode::InvalidSync | ExitCode::DataError) {
            warn!(sync_db_id, exit = %info, "Deferred sync start failed, rolling back");
            self.stop_sync_task(sync_db_id).await;
            if let Err(e) = self.store.delete_sync(sync_db_id).await {
                error!(sync_db_id, error = %e, "Sync rollback delete failed");
            }
            self.signal(Signal::SyncRemoved { sync_db_id });
        }
    }

    /// Deferred sync deletion with cascade: the last sync of a drive
    /// deletes the drive, the last drive of an account deletes the
    /// account. Failures surface through the error channel and a
    /// deletion-failed signal, never through the original reply.
    pub async fn finish_delete_sync(&mut self, sync_db_id: i64) {
        let sync = match self.store.get_sync(sync_db_id).await {
            Ok(Some(sync)) => sync,
            Ok(None) => {
                debug!(sync_db_id, "Sync already gone");
                return;
            }
            Err(e) => {
                let info = db_error(e);
                self.add_error(ErrorRecord::sync(
                    sync_db_id,
                    "delete_sync",
                    info.code,
                    info.cause,
                ))
                .await;
                self.signal(Signal::SyncDeletionFailed { sync_db_id });
                return;
            }
        };

        self.stop_sync_task(sync_db_id).await;

        if let Err(e) = self.store.delete_sync(sync_db_id).await {
            let info = db_error(e);
            self.add_error(ErrorRecord::sync(
                sync_db_id,
                "delete_sync",
                info.code,
                info.cause,
            ))
            .await;
            self.signal(Signal::SyncDeletionFailed { sync_db_id });
            return;
        }
        if let Err(e) = self.store.delete_errors_for_sync(sync_db_id).await {
            warn!(sync_db_id, error = %e, "Stale error cleanup failed");
        }
        info!(sync_db_id, "Sync deleted");
        self.signal(Signal::SyncRemoved { sync_db_id });

        self.cascade_after_sync_delete(sync.drive_db_id).await;
    }

    async fn cascade_after_sync_delete(&mut self, drive_db_id: i64) {
        let remaining = match self.store.syncs_for_drive(drive_db_id).await {
            Ok(syncs) => syncs,
            Err(e) => {
                warn!(drive_db_id, error = %e, "Cascade check failed");
                return;
            }
        };
        if !remaining.is_empty() {
            return;
        }

        let drive = match self.store.get_drive(drive_db_id).await {
            Ok(Some(drive)) => drive,
            _ => return,
        };
        if let Err(e) = self.store.delete_drive(drive_db_id).await {
            warn!(drive_db_id, error = %e, "Drive cascade delete failed");
            let info = db_error(e);
            self.add_error(ErrorRecord::server("delete_drive", info.code, info.cause))
                .await;
            self.signal(Signal::DriveDeletionFailed { drive_db_id });
            return;
        }
        info!(drive_db_id, "Last sync removed, drive deleted");
        self.signal(Signal::DriveRemoved { drive_db_id });

        let account_db_id = drive.account_db_id;
        match self.store.drive_count_for_account(account_db_id).await {
            Ok(0) => {
                if let Err(e) = self.store.delete_account(account_db_id).await {
                    warn!(account_db_id, error = %e, "Account cascade delete failed");
                    return;
                }
                info!(account_db_id, "Last drive removed, account deleted");
                self.signal(Signal::AccountRemoved { account_db_id });
            }
            Ok(_) => {}
            Err(e) => warn!(account_db_id, error = %e, "Cascade check failed"),
        }
    }

    /// Deferred drive deletion: every sync of the drive is torn down and
    /// deleted, then the drive itself (cascading to the account when it
    /// was the last one).
    pub async fn finish_delete_drive(&mut self, drive_db_id: i64) {
        let syncs = match self.store.syncs_for_drive(drive_db_id).await {
            Ok(syncs) => syncs,
            Err(e) => {
                warn!(drive_db_id, error = %e, "Drive deletion lookup failed");
                self.signal(Signal::DriveDeletionFailed { drive_db_id });
                return;
            }
        };
        for sync in syncs {
            self.finish_delete_sync(sync.db_id).await;
        }
        // The cascade of the last sync already removed the drive row; if
        // the drive had no syncs at all, delete it here.
        if let Ok(Some(drive)) = self.store.get_drive(drive_db_id).await {
            if let Err(e) = self.store.delete_drive(drive_db_id).await {
                warn!(drive_db_id, error = %e, "Drive delete failed");
                self.signal(Signal::DriveDeletionFailed { drive_db_id });
                return;
            }
            self.signal(Signal::DriveRemoved { drive_db_id });
            match self.store.drive_count_for_account(drive.account_db_id).await {
                Ok(0) => {
                    if self.store.delete_account(drive.account_db_id).await.is_ok() {
                        self.signal(Signal::AccountRemoved {
                            account_db_id: drive.account_db_id,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    /// Deletes a user: every sync under the user's drives is torn down,
    /// the keyring entry is removed, then the row (accounts, drives and
    /// syncs cascade in the store).
    pub async fn delete_user(&mut self, user_db_id: i64) -> ExitInfo {
        let user = match self.store.get_user(user_db_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return ExitInfo::new(ExitCode::DataError, ExitCause::DbEntryNotFound),
            Err(e) => return db_error(e),
        };

        let accounts = match self.store.accounts_for_user(user_db_id).await {
            Ok(accounts) => accounts,
            Err(e) => return db_error(e),
        };
        let drives = match self.store.all_drives().await {
            Ok(drives) => drives,
            Err(e) => return db_error(e),
        };
        for drive in drives
            .iter()
            .filter(|d| accounts.iter().any(|a| a.db_id == d.account_db_id))
        {
            if let Ok(syncs) = self.store.syncs_for_drive(drive.db_id).await {
                for sync in syncs {
                    self.stop_sync_task(sync.db_id).await;
                }
            }
        }

        if let Some(credential_key) = &user.credential_key {
            match keyring::Entry::new(KEYRING_SERVICE, credential_key) {
                Ok(entry) => {
                    if let Err(e) = entry.delete_credential() {
                        warn!(email = %user.email, error = %e, "Keyring entry removal failed");
                    }
                }
                Err(e) => warn!(email = %user.email, error = %e, "Keyring entry lookup failed"),
            }
        }

        if let Err(e) = self.store.delete_user(user_db_id).await {
            return db_error(e);
        }
        info!(user_db_id, "User deleted");
        self.signal(Signal::UserRemoved { user_db_id });
        ExitInfo::OK
    }

    // ========================================================================
    // Virtual-file mode transition
    // ========================================================================

    /// Toggles virtual files on one sync.
    ///
    /// Ordering: stop supervisor, stop adapter, wipe placeholders when
    /// turning off, persist the new mode, recreate the adapter, start it,
    /// convert to placeholders, restart the supervisor. A platform
    /// permission denial still commits the mode change and reports
    /// `LiteSyncNotAllowed`; the supervisor is left unstarted.
    pub async fn set_supports_virtual_files(&mut self, sync_db_id: i64, value: bool) -> ExitInfo {
        let mut sync = match self.store.get_sync(sync_db_id).await {
            Ok(Some(sync)) => sync,
            Ok(None) => return ExitInfo::new(ExitCode::DataError, ExitCause::DbEntryNotFound),
            Err(e) => return db_error(e),
        };
        if sync.supports_virtual_files == value {
            return ExitInfo::OK;
        }

        // 1. supervisor down
        if let Some(supervisor) = self.supervisors.get(&sync_db_id).map(Arc::clone) {
            if let Err(info) = supervisor.stop(StopOptions::default()).await {
                warn!(sync_db_id, exit = %info, "Supervisor stop failed during mode change");
            }
        }

        // 2. adapter down and out of the registry
        if let Some(adapter) = self.adapters.remove(&sync_db_id) {
            if let Err(info) = adapter.stop(true).await {
                warn!(sync_db_id, exit = %info, "Adapter stop failed during mode change");
            }
        }

        // 3. restore real files when turning virtual files off
        if !value {
            if let Err(info) = cirrus_vfs::wipe_placeholders(&sync.local_path) {
                self.add_error(
                    ErrorRecord::sync(sync_db_id, "set_supports_virtual_files", info.code, info.cause)
                        .with_path(sync.local_path.to_string_lossy()),
                )
                .await;
                return info;
            }
        }

        // 4. commit the mode before any adapter exists for it; recoverable
        //    by re-attempting adapter creation on the next startup
        sync.supports_virtual_files = value;
        sync.virtual_file_mode = if value {
            self.probe.best_available_mode()
        } else {
            VfsMode::Off
        };
        if let Err(e) = self.store.update_sync(&sync).await {
            return db_error(e);
        }

        // 5.-6. new adapter for the new mode
        if let Err(info) = self.try_create_and_start_vfs(&sync).await {
            if info.cause == ExitCause::LiteSyncNotAllowed {
                info!(sync_db_id, "Virtualization denied, mode committed without adapter");
                self.signal(Signal::SyncUpdated { sync_db_id });
                return info;
            }
            self.add_error(
                ErrorRecord::sync(sync_db_id, "set_supports_virtual_files", info.code, info.cause)
                    .with_path(sync.local_path.to_string_lossy()),
            )
            .await;
            return info;
        }

        // 7. adapter confirmed running: convert, then supervisor back up
        if value {
            if let Some(adapter) = self.adapters.get(&sync_db_id).map(Arc::clone) {
                if let Err(info) = adapter.convert_dir_to_placeholders(&sync.local_path).await {
                    self.add_error(
                        ErrorRecord::sync(
                            sync_db_id,
                            "set_supports_virtual_files",
                            info.code,
                            info.cause,
                        )
                        .with_path(sync.local_path.to_string_lossy()),
                    )
                    .await;
                    return info;
                }
                self.signal(Signal::VfsConversionCompleted { sync_db_id });
            }
        }

        let restart = match self.init_supervisor(&sync).await {
            Ok(supervisor) => supervisor.start().await,
            Err(info) => Err(info),
        };
        if let Err(info) = restart {
            self.add_error(ErrorRecord::sync(
                sync_db_id,
                "set_supports_virtual_files",
                info.code,
                info.cause,
            ))
            .await;
            return info;
        }

        info!(sync_db_id, virtual_files = value, "Virtual-file mode changed");
        self.signal(Signal::SyncUpdated { sync_db_id });
        ExitInfo::OK
    }

    // ========================================================================
    // Error recording
    // ========================================================================

    /// Records an error with deduplication and the reactive policies tied
    /// to specific codes. Never fails; store trouble is logged.
    pub async fn add_error(&mut self, record: ErrorRecord) {
        let existing = if record.level == ErrorLevel::Server {
            self.store.server_errors().await
        } else {
            self.store.errors_for_sync(record.sync_db_id).await
        };
        let existing = match existing {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, "Error lookup failed");
                Vec::new()
            }
        };

        if let Some(duplicate) = existing.iter().find(|e| e.is_similar_to(&record)) {
            debug!(db_id = duplicate.db_id, "Duplicate error, refreshing timestamp");
            if let Err(e) = self
                .store
                .refresh_error_time(duplicate.db_id, Utc::now())
                .await
            {
                error!(error = %e, "Error refresh failed");
            }
        } else {
            if let Err(e) = self.store.insert_error(&record).await {
                error!(error = %e, "Error insert failed");
            }
            self.prune_descendant_errors(&record, &existing).await;
        }

        let user = self.user_for_record(&record).await;

        if record.exit_code == ExitCode::InvalidToken {
            self.demote_user(user.as_ref()).await;
        }

        if record.exit_code == ExitCode::NetworkError
            || record.exit_cause == ExitCause::SocketsDefuncted
        {
            self.jobs.decrease_capacity();
        }

        if !record.is_auto_resolved() {
            self.telemetry.capture_error(&record, user.as_ref());
            self.notify_sync_error(&record).await;
        }

        self.signal(Signal::ErrorAdded {
            server_level: record.level == ErrorLevel::Server,
            sync_db_id: record.sync_db_id,
        });
    }

    /// A file-access failure at a parent path supersedes records for
    /// anything beneath it.
    async fn prune_descendant_errors(&self, record: &ErrorRecord, existing: &[ErrorRecord]) {
        if record.exit_cause != ExitCause::FileAccessError {
            return;
        }
        let Some(parent) = &record.local_path else {
            return;
        };
        let parent = Path::new(parent);
        for stale in existing {
            let Some(path) = &stale.local_path else {
                continue;
            };
            let path = Path::new(path);
            if path != parent && path.starts_with(parent) {
                debug!(db_id = stale.db_id, "Pruning descendant error record");
                if let Err(e) = self.store.delete_error(stale.db_id).await {
                    warn!(error = %e, "Descendant error prune failed");
                }
            }
        }
    }

    async fn user_for_record(&self, record: &ErrorRecord) -> Option<cirrus_core::domain::User> {
        if record.level == ErrorLevel::Server {
            return None;
        }
        self.store
            .user_for_sync(record.sync_db_id)
            .await
            .ok()
            .flatten()
    }

    /// An invalid credential demotes the user to disconnected and drops
    /// the keyring entry; the presentation layer re-authenticates instead
    /// of the daemon retrying.
    async fn demote_user(&mut self, user: Option<&cirrus_core::domain::User>) {
        let Some(user) = user else { return };
        let Some(credential_key) = &user.credential_key else {
            return;
        };

        match keyring::Entry::new(KEYRING_SERVICE, credential_key) {
            Ok(entry) => {
                if let Err(e) = entry.delete_credential() {
                    warn!(email = %user.email, error = %e, "Keyring entry removal failed");
                }
            }
            Err(e) => warn!(email = %user.email, error = %e, "Keyring entry lookup failed"),
        }

        let mut updated = user.clone();
        updated.credential_key = None;
        if let Err(e) = self.store.update_user(&updated).await {
            error!(user_db_id = user.db_id, error = %e, "User demotion failed");
            return;
        }
        warn!(email = %user.email, "Credentials invalid, user disconnected");
        self.signal(Signal::UserUpdated {
            user_db_id: user.db_id,
        });
        self.signal(Signal::UserStatusChanged {
            user_db_id: user.db_id,
            connected: false,
        });
    }

    /// Surfaces a sync error as a desktop notification when the owning
    /// drive has notifications enabled.
    async fn notify_sync_error(&self, record: &ErrorRecord) {
        if record.level == ErrorLevel::Server {
            return;
        }
        let Ok(Some(sync)) = self.store.get_sync(record.sync_db_id).await else {
            return;
        };
        let Ok(Some(drive)) = self.store.get_drive(sync.drive_db_id).await else {
            return;
        };
        if !drive.notifications_enabled {
            return;
        }
        self.signal(Signal::ShowNotification {
            title: drive.name.clone(),
            message: format!("Synchronization error: {}", record.exit_cause),
        });
    }

    /// Clears recorded errors for one sync (or server-level records for
    /// `sync_db_id == 0`), optionally only the auto-resolved ones.
    pub async fn clear_errors(&mut self, sync_db_id: i64, auto_resolved_only: bool) -> ExitInfo {
        let result = if auto_resolved_only {
            let records = if sync_db_id == 0 {
                self.store.server_errors().await
            } else {
                self.store.errors_for_sync(sync_db_id).await
            };
            match records {
                Ok(records) => {
                    let mut failed = None;
                    for record in records.iter().filter(|r| r.is_auto_resolved()) {
                        if let Err(e) = self.store.delete_error(record.db_id).await {
                            failed = Some(e);
                        }
                    }
                    match failed {
                        Some(e) => Err(e),
                        None => Ok(()),
                    }
                }
                Err(e) => Err(e),
            }
        } else if sync_db_id == 0 {
            self.store.delete_server_errors().await
        } else {
            self.store.delete_errors_for_sync(sync_db_id).await
        };

        match result {
            Ok(()) => {
                self.signal(Signal::ErrorsCleared { sync_db_id });
                ExitInfo::OK
            }
            Err(e) => db_error(e),
        }
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Starts every non-paused sync, isolating per-sync failures, and
    /// clears pending migration flags of connected users.
    pub async fn start_all_syncs(&mut self) -> ExitInfo {
        let users = match self.store.all_users().await {
            Ok(users) => users,
            Err(e) => return db_error(e),
        };
        for user in &users {
            if user.is_connected() && user.to_migrate {
                let mut updated = user.clone();
                updated.to_migrate = false;
                if let Err(e) = self.store.update_user(&updated).await {
                    warn!(user_db_id = user.db_id, error = %e, "Migration flag clear failed");
                } else {
                    info!(user_db_id = user.db_id, "Migration flag cleared");
                }
            }
        }

        let syncs = match self.store.all_syncs().await {
            Ok(syncs) => syncs,
            Err(e) => return db_error(e),
        };
        let mut merged = ExitInfo::OK;
        for sync in syncs {
            if sync.paused {
                debug!(sync_db_id = sync.db_id, "Skipping paused sync");
                continue;
            }
            let info = self.start_sync(sync.db_id).await;
            if !info.is_ok() {
                warn!(sync_db_id = sync.db_id, exit = %info, "Sync start failed, continuing");
                merged = merged.merge(info);
            }
        }
        merged
    }

    /// Stops everything for process shutdown.
    pub async fn shutdown(&mut self) {
        let ids: Vec<i64> = self.supervisors.keys().copied().collect();
        for sync_db_id in ids {
            let supervisor = self.supervisors.remove(&sync_db_id);
            let adapter = self.adapters.remove(&sync_db_id);
            if let Some(supervisor) = supervisor {
                let opts = StopOptions {
                    quit: true,
                    ..StopOptions::default()
                };
                if let Err(info) = supervisor.stop(opts).await {
                    warn!(sync_db_id, exit = %info, "Supervisor shutdown failed");
                }
            }
            if let Some(adapter) = adapter {
                if let Err(info) = adapter.stop(false).await {
                    warn!(sync_db_id, exit = %info, "Adapter shutdown failed");
                }
            }
        }
        self.jobs.shutdown();
        info!("Orchestrator shut down");
    }
}
