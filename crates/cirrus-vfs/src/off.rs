//! No-op backend for syncs without virtual files

use std::path::Path;

use async_trait::async_trait;

use cirrus_core::domain::VfsMode;
use cirrus_core::ports::{PinState, VfsAdapter, VfsSetupParams, VfsStatus};
use cirrus_core::ExitResult;

/// Backend used while `virtual_file_mode` is `Off`.
///
/// Every file is a real, fully hydrated file; all operations succeed
/// without touching the disk. Keeping a live adapter even in this mode
/// lets the orchestrator treat the lifecycle uniformly.
#[derive(Debug)]
pub struct OffVfs {
    params: VfsSetupParams,
}

impl OffVfs {
    pub fn new(params: VfsSetupParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl VfsAdapter for OffVfs {
    fn mode(&self) -> VfsMode {
        VfsMode::Off
    }

    fn sync_db_id(&self) -> i64 {
        self.params.sync_db_id
    }

    async fn start(&self) -> ExitResult {
        tracing::debug!(sync_db_id = self.params.sync_db_id, "Off backend started");
        Ok(())
    }

    async fn stop(&self, _unregister: bool) -> ExitResult {
        Ok(())
    }

    async fn convert_dir_to_placeholders(&self, _dir: &Path) -> ExitResult {
        Ok(())
    }

    async fn status(&self, _path: &Path) -> ExitResult<VfsStatus> {
        Ok(VfsStatus {
            is_placeholder: false,
            is_hydrated: true,
            is_syncing: false,
            progress: 100,
        })
    }

    async fn set_pin_state(&self, _path: &Path, _state: PinState) -> ExitResult {
        Ok(())
    }

    async fn clear_file_attributes(&self, _path: &Path) -> ExitResult {
        Ok(())
    }
}
