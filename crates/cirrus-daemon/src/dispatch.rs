//! The dispatch task
//!
//! One task owns the [`Orchestrator`] exclusively: it answers IPC
//! requests, runs deferred tasks and fires the periodic timers. Slow
//! operations never run inline; they are rescheduled as deferred tasks
//! (short-delay closures re-queued through the event channel) or queued
//! on the job pool, whose completions also come back through the event
//! channel. Registry mutation therefore needs no locking at all.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cirrus_core::domain::{AppStateKey, LogUploadState, NodeId};
use cirrus_core::ports::StopOptions;
use cirrus_core::{Config, ExitCause, ExitCode, ExitInfo};
use cirrus_ipc::{Reply, Request, RequestEnvelope, Signal};
use cirrus_jobs::{JobPriority, LogTransport, LogUploadJob};
use cirrus_store::StoreError;

use crate::orchestrator::Orchestrator;

/// A closure run later on the dispatch task with exclusive orchestrator
/// access.
pub type DeferredTask = Box<
    dyn for<'a> FnOnce(&'a mut Orchestrator) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>
        + Send,
>;

pub enum DispatchEvent {
    Deferred(DeferredTask),
}

const EVENT_CHANNEL_CAPACITY: usize = 128;
const ADD_SYNC_DEFER: Duration = Duration::from_millis(100);

fn db_error(e: StoreError) -> ExitInfo {
    warn!(error = %e, "Store access failed");
    ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError)
}

fn ok_json<T: serde::Serialize>(value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(json) => Reply::ok(json),
        Err(e) => {
            warn!(error = %e, "Reply serialization failed");
            Reply::error(ExitInfo::new(ExitCode::LogicError, ExitCause::Unknown))
        }
    }
}

pub struct Dispatcher {
    orchestrator: Orchestrator,
    requests_rx: mpsc::Receiver<RequestEnvelope>,
    events_tx: mpsc::Sender<DispatchEvent>,
    events_rx: mpsc::Receiver<DispatchEvent>,
    parameters: HashMap<String, String>,
    log_dir: PathBuf,
    upload_chunk_size: usize,
    log_transport: Arc<dyn LogTransport>,
    upload_cancel: Option<CancellationToken>,
    status_interval: Duration,
    bootstrap_done: bool,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Orchestrator,
        requests_rx: mpsc::Receiver<RequestEnvelope>,
        log_transport: Arc<dyn LogTransport>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut parameters = HashMap::new();
        parameters.insert("log_level".to_string(), config.logging.level.clone());
        parameters.insert("update_channel".to_string(), "prod".to_string());

        Self {
            orchestrator,
            requests_rx,
            events_tx,
            events_rx,
            parameters,
            log_dir: config.paths.log_dir.clone(),
            upload_chunk_size: (config.jobs.upload_chunk_kib as usize) * 1024,
            log_transport,
            upload_cancel: None,
            status_interval: Duration::from_secs(config.sync.status_interval.max(1)),
            bootstrap_done: false,
            shutdown,
        }
    }

    /// Seeds a startup parameter the presentation process queries after
    /// connecting (which window to open, for example).
    pub fn set_parameter(&mut self, name: &str, value: &str) {
        self.parameters.insert(name.to_string(), value.to_string());
    }

    /// Re-queues `task` onto the dispatch task after `delay`.
    fn defer(&self, delay: Duration, task: DeferredTask) {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events_tx.send(DispatchEvent::Deferred(task)).await.is_err() {
                debug!("Dispatch loop gone, deferred task dropped");
            }
        });
    }

    /// Runs until shutdown. Startup work (the first `start_all_syncs`)
    /// happens here so nothing touches the orchestrator before the loop
    /// owns it.
    pub async fn run(mut self) {
        let info = self.orchestrator.start_all_syncs().await;
        if !info.is_ok() {
            warn!(exit = %info, "Initial sync startup reported failures");
        }
        self.bootstrap_done = match self.orchestrator.store().all_users().await {
            Ok(users) => !users.is_empty(),
            Err(_) => false,
        };

        let mut status_tick = tokio::time::interval(self.status_interval);
        status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = self.requests_rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    self.handle_request(envelope).await;
                }
                event = self.events_rx.recv() => {
                    if let Some(DispatchEvent::Deferred(task)) = event {
                        task(&mut self.orchestrator).await;
                    }
                }
                _ = status_tick.tick() => {
                    self.on_status_tick().await;
                }
            }
        }

        self.orchestrator.shutdown().await;
        info!("Dispatch loop stopped");
    }

    async fn on_status_tick(&mut self) {
        for (sync_db_id, status) in self.orchestrator.sync_statuses() {
            self.orchestrator.signal(Signal::SyncProgressInfo {
                sync_db_id,
                status: status.to_string(),
            });
        }

        // A fresh install has no users until the presentation process
        // creates one; retry the startup walk once they appear.
        if !self.bootstrap_done {
            if let Ok(users) = self.orchestrator.store().all_users().await {
                if !users.is_empty() {
                    info!("Users appeared, starting configured syncs");
                    self.orchestrator.start_all_syncs().await;
                    self.bootstrap_done = true;
                }
            }
        }
    }

    async fn handle_request(&mut self, envelope: RequestEnvelope) {
        debug!(request = ?envelope.request, "Dispatching request");
        let reply = self.dispatch(envelope.request).await;
        if envelope.reply.send(reply).is_err() {
            debug!("Requester went away before the reply");
        }
    }

    async fn dispatch(&mut self, request: Request) -> Reply {
        match request {
            // ----------------------------------------------------------------
            // Users / accounts / drives
            // ----------------------------------------------------------------
            Request::UserList => match self.orchestrator.store().all_users().await {
                Ok(users) => ok_json(&users),
                Err(e) => Reply::error(db_error(e)),
            },
            Request::UserDelete { user_db_id } => {
                let info = self.orchestrator.delete_user(user_db_id).await;
                Reply {
                    exit: info,
                    result: serde_json::Value::Null,
                }
            }
            Request::AccountList { user_db_id } => {
                match self.orchestrator.store().accounts_for_user(user_db_id).await {
                    Ok(accounts) => ok_json(&accounts),
                    Err(e) => Reply::error(db_error(e)),
                }
            }
            Request::DriveList => match self.orchestrator.store().all_drives().await {
                Ok(drives) => ok_json(&drives),
                Err(e) => Reply::error(db_error(e)),
            },
            Request::DriveDelete { drive_db_id } => {
                self.defer(
                    Duration::ZERO,
                    Box::new(move |orch| {
                        Box::pin(async move { orch.finish_delete_drive(drive_db_id).await })
                    }),
                );
                Reply::ok(serde_json::Value::Null)
            }

            // ----------------------------------------------------------------
            // Syncs
            // ----------------------------------------------------------------
            Request::SyncList => match self.orchestrator.store().all_syncs().await {
                Ok(syncs) => ok_json(&syncs),
                Err(e) => Reply::error(db_error(e)),
            },
            Request::SyncStart { sync_db_id } => {
                // An explicit start clears a user pause.
                match self.orchestrator.store().get_sync(sync_db_id).await {
                    Ok(Some(sync)) if sync.paused => {
                        let mut updated = sync;
                        updated.paused = false;
                        if let Err(e) = self.orchestrator.store().update_sync(&updated).await {
                            return Reply::error(db_error(e));
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        return Reply::error(ExitInfo::new(
                            ExitCode::DataError,
                            ExitCause::DbEntryNotFound,
                        ))
                    }
                    Err(e) => return Reply::error(db_error(e)),
                }
                let info = self.orchestrator.start_sync(sync_db_id).await;
                Reply {
                    exit: info,
                    result: serde_json::Value::Null,
                }
            }
            Request::SyncStop { sync_db_id } => {
                let opts = StopOptions {
                    paused_by_user: true,
                    ..StopOptions::default()
                };
                let info = self.orchestrator.stop_sync(sync_db_id, opts).await;
                Reply {
                    exit: info,
                    result: serde_json::Value::Null,
                }
            }
            Request::SyncStatus { sync_db_id } => {
                if let Some(supervisor) = self.orchestrator.supervisor(sync_db_id) {
                    return ok_json(&serde_json::json!({
                        "status": supervisor.status().to_string(),
                    }));
                }
                match self.orchestrator.store().get_sync(sync_db_id).await {
                    Ok(Some(_)) => ok_json(&serde_json::json!({
                        "status": cirrus_core::domain::SyncStatus::Stopped.to_string(),
                    })),
                    Ok(None) => Reply::error(ExitInfo::new(
                        ExitCode::DataError,
                        ExitCause::DbEntryNotFound,
                    )),
                    Err(e) => Reply::error(db_error(e)),
                }
            }
            Request::SyncAdd {
                drive_db_id,
                local_path,
                target_path,
                target_node_id,
                black_list,
                white_list,
            } => {
                let added = self
                    .orchestrator
                    .add_sync(
                        drive_db_id,
                        local_path,
                        target_path,
                        target_node_id,
                        black_list,
                        white_list,
                    )
                    .await;
                match added {
                    Ok(sync_db_id) => {
                        self.defer(
                            ADD_SYNC_DEFER,
                            Box::new(move |orch| {
                                Box::pin(async move { orch.finish_add_sync(sync_db_id).await })
                            }),
                        );
                        Reply::ok(serde_json::json!({ "sync_db_id": sync_db_id }))
                    }
                    Err(info) => Reply::error(info),
                }
            }
            Request::SyncDelete { sync_db_id } => {
                self.defer(
                    Duration::ZERO,
                    Box::new(move |orch| {
                        Box::pin(async move { orch.finish_delete_sync(sync_db_id).await })
                    }),
                );
                Reply::ok(serde_json::Value::Null)
            }
            Request::SyncSetSupportsVirtualFiles { sync_db_id, value } => {
                let info = self
                    .orchestrator
                    .set_supports_virtual_files(sync_db_id, value)
                    .await;
                Reply {
                    exit: info,
                    result: serde_json::Value::Null,
                }
            }

            // ----------------------------------------------------------------
            // Node sets
            // ----------------------------------------------------------------
            Request::NodeSetGet { sync_db_id, kind } => {
                match self.orchestrator.store().node_set(sync_db_id, kind).await {
                    Ok(nodes) => {
                        let mut ids: Vec<&str> = nodes.iter().map(|n| n.as_str()).collect();
                        ids.sort_unstable();
                        ok_json(&ids)
                    }
                    Err(e) => Reply::error(db_error(e)),
                }
            }
            Request::NodeSetSet {
                sync_db_id,
                kind,
                nodes,
            } => {
                if let Err(e) = self
                    .orchestrator
                    .store()
                    .set_node_set(sync_db_id, kind, &nodes)
                    .await
                {
                    return Reply::error(db_error(e));
                }
                if let Some(supervisor) = self.orchestrator.supervisor(sync_db_id) {
                    if let Err(info) = supervisor.set_node_set(kind, nodes).await {
                        return Reply::error(info);
                    }
                }
                Reply::ok(serde_json::Value::Null)
            }
            Request::NodeSubfolders {
                sync_db_id,
                node_id,
            } => self.list_subfolders(sync_db_id, &node_id).await,
            Request::NodeFolderSize {
                sync_db_id,
                node_id,
            } => self.queue_folder_size(sync_db_id, node_id).await,

            // ----------------------------------------------------------------
            // Parameters / app state
            // ----------------------------------------------------------------
            Request::ParameterGet { name } => match self.parameters.get(&name) {
                Some(value) => ok_json(&serde_json::json!({ "value": value })),
                None => Reply::error(ExitInfo::new(ExitCode::DataError, ExitCause::NotFound)),
            },
            Request::ParameterSet { name, value } => {
                self.parameters.insert(name, value);
                Reply::ok(serde_json::Value::Null)
            }
            Request::AppStateGet { key } => {
                let Some(key) = parse_app_state_key(&key) else {
                    return Reply::error(ExitInfo::new(ExitCode::DataError, ExitCause::NotFound));
                };
                match self.orchestrator.store().app_state_value(key).await {
                    Ok(value) => ok_json(&serde_json::json!({ "value": value })),
                    Err(e) => Reply::error(db_error(e)),
                }
            }
            Request::AppStateSet { key, value } => {
                let Some(key) = parse_app_state_key(&key) else {
                    return Reply::error(ExitInfo::new(ExitCode::DataError, ExitCause::NotFound));
                };
                match self
                    .orchestrator
                    .store()
                    .set_app_state_value(key, &value)
                    .await
                {
                    Ok(()) => Reply::ok(serde_json::Value::Null),
                    Err(e) => Reply::error(db_error(e)),
                }
            }

            // ----------------------------------------------------------------
            // Errors
            // ----------------------------------------------------------------
            Request::ErrorList { sync_db_id } => {
                let records = if sync_db_id == 0 {
                    self.orchestrator.store().server_errors().await
                } else {
                    self.orchestrator.store().errors_for_sync(sync_db_id).await
                };
                match records {
                    Ok(records) => ok_json(&records),
                    Err(e) => Reply::error(db_error(e)),
                }
            }
            Request::ErrorsClear {
                sync_db_id,
                auto_resolved_only,
            } => {
                let info = self
                    .orchestrator
                    .clear_errors(sync_db_id, auto_resolved_only)
                    .await;
                Reply {
                    exit: info,
                    result: serde_json::Value::Null,
                }
            }

            // ----------------------------------------------------------------
            // Log upload / updater / utility
            // ----------------------------------------------------------------
            Request::LogUpload => self.queue_log_upload().await,
            Request::LogUploadCancel => self.cancel_log_upload().await,
            Request::UpdaterChangeChannel { channel } => {
                info!(channel = %channel, "Distribution channel changed");
                self.parameters.insert("update_channel".to_string(), channel);
                Reply::ok(serde_json::Value::Null)
            }
            Request::Quit => {
                info!("Quit requested over IPC");
                self.orchestrator.signal(Signal::Quit);
                self.shutdown.cancel();
                Reply::ok(serde_json::Value::Null)
            }
        }
    }

    /// Resolves a node to its folder under the sync root. Node ids double
    /// as sync-relative paths for the local tree.
    async fn node_local_path(&self, sync_db_id: i64, node_id: &NodeId) -> Result<PathBuf, Reply> {
        match self.orchestrator.store().get_sync(sync_db_id).await {
            Ok(Some(sync)) => Ok(sync.local_path.join(node_id.as_str())),
            Ok(None) => Err(Reply::error(ExitInfo::new(
                ExitCode::DataError,
                ExitCause::DbEntryNotFound,
            ))),
            Err(e) => Err(Reply::error(db_error(e))),
        }
    }

    async fn list_subfolders(&self, sync_db_id: i64, node_id: &NodeId) -> Reply {
        let dir = match self.node_local_path(sync_db_id, node_id).await {
            Ok(dir) => dir,
            Err(reply) => return reply,
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Subfolder listing failed");
                return Reply::error(ExitInfo::new(
                    ExitCode::SystemError,
                    ExitCause::FileAccessError,
                ));
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_unstable();
        ok_json(&names)
    }

    /// Fire-and-forget folder-size computation on the job pool; the result
    /// comes back as a signal.
    async fn queue_folder_size(&mut self, sync_db_id: i64, node_id: NodeId) -> Reply {
        let dir = match self.node_local_path(sync_db_id, &node_id).await {
            Ok(dir) => dir,
            Err(reply) => return reply,
        };

        let events_tx = self.events_tx.clone();
        self.orchestrator.jobs().queue(
            JobPriority::Normal,
            format!("folder-size-{sync_db_id}"),
            async move {
                let result = cirrus_jobs::compute_folder_size(&dir);
                let task: DeferredTask = Box::new(move |orch| {
                    Box::pin(async move {
                        match result {
                            Ok(size) => orch.signal(Signal::NodeFolderSizeCompleted {
                                sync_db_id,
                                node_id,
                                size,
                            }),
                            Err(info) => {
                                orch.add_error(
                                    cirrus_core::domain::ErrorRecord::sync(
                                        sync_db_id,
                                        "folder_size",
                                        info.code,
                                        info.cause,
                                    )
                                    .with_path(dir.to_string_lossy()),
                                )
                                .await;
                            }
                        }
                    })
                });
                let _ = events_tx.send(DispatchEvent::Deferred(task)).await;
                Ok(())
            },
        );
        Reply::ok(serde_json::Value::Null)
    }

    async fn queue_log_upload(&mut self) -> Reply {
        let store = self.orchestrator.store().clone();
        if let Ok(state) = store.app_state_value(AppStateKey::LogUploadState).await {
            if matches!(
                LogUploadState::parse(&state),
                Some(LogUploadState::Archiving | LogUploadState::Uploading)
            ) {
                debug!("Log upload already running");
                return Reply::error(ExitInfo::new(
                    ExitCode::InvalidOperation,
                    ExitCause::Unknown,
                ));
            }
        }

        let cancel = CancellationToken::new();
        self.upload_cancel = Some(cancel.clone());

        let job = LogUploadJob::new(
            store,
            Arc::clone(&self.log_transport),
            self.log_dir.clone(),
            self.upload_chunk_size,
        );
        let events_tx = self.events_tx.clone();
        self.orchestrator
            .jobs()
            .queue(JobPriority::Low, "log-upload", async move {
                let result = job.run(cancel).await;
                let task: DeferredTask = Box::new(move |orch| {
                    Box::pin(async move {
                        let state = orch
                            .store()
                            .app_state_value(AppStateKey::LogUploadState)
                            .await
                            .unwrap_or_default();
                        let percent = orch
                            .store()
                            .app_state_value(AppStateKey::LogUploadPercent)
                            .await
                            .ok()
                            .and_then(|p| p.parse().ok())
                            .unwrap_or(0);
                        orch.signal(Signal::LogUploadStatusUpdated { state, percent });
                        if let Err(info) = result {
                            if info.code != ExitCode::OperationCanceled {
                                orch.add_error(cirrus_core::domain::ErrorRecord::server(
                                    "log_upload",
                                    info.code,
                                    info.cause,
                                ))
                                .await;
                            }
                        }
                    })
                });
                let _ = events_tx.send(DispatchEvent::Deferred(task)).await;
                Ok(())
            });

        self.orchestrator.signal(Signal::LogUploadStatusUpdated {
            state: LogUploadState::Archiving.as_str().to_string(),
            percent: 0,
        });
        Reply::ok(serde_json::Value::Null)
    }

    async fn cancel_log_upload(&mut self) -> Reply {
        if let Err(e) = self
            .orchestrator
            .store()
            .set_app_state_value(
                AppStateKey::LogUploadState,
                LogUploadState::CancelRequested.as_str(),
            )
            .await
        {
            return Reply::error(db_error(e));
        }
        if let Some(cancel) = self.upload_cancel.take() {
            cancel.cancel();
        }
        Reply::ok(serde_json::Value::Null)
    }
}

fn parse_app_state_key(key: &str) -> Option<AppStateKey> {
    AppStateKey::ALL.into_iter().find(|k| k.as_str() == key)
}
