//! Virtual-filesystem adapter contract
//!
//! One adapter instance per active sync presents the remote tree as local
//! placeholders. Backends are pluggable per [`VfsMode`]; the orchestrator
//! owns the instances and drives their lifecycle.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::VfsMode;
use crate::errors::ExitResult;

/// Construction parameters shared by all adapter backends.
#[derive(Debug, Clone)]
pub struct VfsSetupParams {
    pub sync_db_id: i64,
    pub local_path: PathBuf,
    pub target_path: String,
    pub mode: VfsMode,
}

/// Pin state of a placeholder: whether its content should stay local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    /// Keep hydrated on disk.
    AlwaysLocal,
    /// Content may be dehydrated to a placeholder.
    OnlineOnly,
    Inherited,
}

/// Placeholder status of one path as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VfsStatus {
    pub is_placeholder: bool,
    pub is_hydrated: bool,
    pub is_syncing: bool,
    pub progress: u8,
}

/// Port of a virtual-filesystem backend.
#[async_trait]
pub trait VfsAdapter: std::fmt::Debug + Send + Sync {
    fn mode(&self) -> VfsMode;

    fn sync_db_id(&self) -> i64;

    /// Register the backend over the sync's local folder.
    ///
    /// Fails with `SystemError/LiteSyncNotAllowed` when the platform denies
    /// the virtualization permission, and `SystemError/UnableToCreateVfs`
    /// for any other start failure.
    async fn start(&self) -> ExitResult;

    /// Detach from the local folder. With `unregister`, the platform
    /// registration is removed as well (full teardown rather than a pause).
    async fn stop(&self, unregister: bool) -> ExitResult;

    /// Convert real files under `dir` into placeholders.
    async fn convert_dir_to_placeholders(&self, dir: &Path) -> ExitResult;

    /// Status of one path.
    async fn status(&self, path: &Path) -> ExitResult<VfsStatus>;

    /// Pin or unpin a subtree.
    async fn set_pin_state(&self, path: &Path, state: PinState) -> ExitResult;

    /// Remove backend bookkeeping attributes from a path, leaving plain
    /// file content behind.
    async fn clear_file_attributes(&self, path: &Path) -> ExitResult;
}

/// Capability check for virtualization permissions.
///
/// The mode-transition state machine is platform-agnostic; the platform
/// divergence lives behind this probe, injected at construction.
pub trait VirtualizationProbe: Send + Sync {
    /// `true` when the platform currently allows `mode`.
    fn is_allowed(&self, mode: VfsMode) -> bool;

    /// Best mode the platform supports for new syncs.
    fn best_available_mode(&self) -> VfsMode {
        if self.is_allowed(VfsMode::Suffix) {
            VfsMode::Suffix
        } else {
            VfsMode::Off
        }
    }
}

/// Builds adapters. Injected into the orchestrator so tests can supply
/// scripted backends.
pub trait VfsFactory: Send + Sync {
    fn create(&self, params: VfsSetupParams) -> ExitResult<std::sync::Arc<dyn VfsAdapter>>;
}
