//! Sync Supervisor lifecycle contract
//!
//! The supervisor is the per-sync reconciliation state machine. The
//! orchestrator consumes it exclusively through this port: construction,
//! start/stop/pause/resume and status. Its internal diff/propagation
//! algorithm is not part of the contract.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::{NodeId, SyncStatus};
use crate::errors::ExitResult;

/// Resource classes released by a stop request.
///
/// A user pause keeps everything registered; a stop for deletion releases
/// the supervisor's database nodes as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// The user asked for a pause; the sync row keeps its paused flag.
    pub paused_by_user: bool,
    /// Process shutdown: skip persisting transient state.
    pub quit: bool,
    /// Stop for deletion: also clear the supervisor's node database.
    pub clear: bool,
}

/// Lifecycle port of the per-sync reconciliation engine.
#[async_trait]
pub trait SyncSupervisor: Send + Sync {
    fn sync_db_id(&self) -> i64;

    /// Begin reconciling. Idempotent while already started.
    async fn start(&self) -> ExitResult;

    /// Stop reconciling, releasing the resource classes selected by `opts`.
    /// Idempotent when already stopped.
    async fn stop(&self, opts: StopOptions) -> ExitResult;

    async fn pause(&self) -> ExitResult;

    async fn resume(&self) -> ExitResult;

    fn status(&self) -> SyncStatus;

    fn is_running(&self) -> bool {
        matches!(self.status(), SyncStatus::Running | SyncStatus::Idle)
    }

    /// Replace the supervisor's node sets after a selective-sync decision.
    async fn set_node_set(
        &self,
        kind: crate::domain::NodeSetKind,
        nodes: HashSet<NodeId>,
    ) -> ExitResult;

    /// Restore placeholder artifacts under the sync root to real files.
    /// Used when virtual files are turned off.
    async fn wipe_virtual_files(&self) -> ExitResult;

    /// Drop the supervisor's node database so the next start performs a
    /// full rebuild.
    async fn clear_nodes(&self) -> ExitResult;
}

/// Builds supervisors. Injected into the orchestrator so tests can supply
/// inert implementations.
#[async_trait]
pub trait SupervisorFactory: Send + Sync {
    async fn create(
        &self,
        sync: &crate::domain::Sync,
    ) -> ExitResult<std::sync::Arc<dyn SyncSupervisor>>;
}
