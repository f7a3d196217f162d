//! Adapter construction

use std::sync::Arc;

use cirrus_core::domain::VfsMode;
use cirrus_core::ports::{VfsAdapter, VfsFactory, VfsSetupParams, VirtualizationProbe};
use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};

use crate::off::OffVfs;
use crate::suffix::SuffixVfs;

/// Builds the backend matching a sync's configured mode.
///
/// Modes the injected probe reports as unavailable are refused with
/// `SystemError/LiteSyncNotAllowed` so callers can distinguish a missing
/// platform permission from a hard failure.
pub struct DefaultVfsFactory {
    probe: Arc<dyn VirtualizationProbe>,
}

impl DefaultVfsFactory {
    pub fn new(probe: Arc<dyn VirtualizationProbe>) -> Self {
        Self { probe }
    }
}

impl VfsFactory for DefaultVfsFactory {
    fn create(&self, params: VfsSetupParams) -> ExitResult<Arc<dyn VfsAdapter>> {
        if !self.probe.is_allowed(params.mode) {
            tracing::warn!(
                sync_db_id = params.sync_db_id,
                mode = %params.mode,
                "Virtualization mode not allowed on this platform"
            );
            return Err(ExitInfo::new(
                ExitCode::SystemError,
                ExitCause::LiteSyncNotAllowed,
            ));
        }

        let adapter: Arc<dyn VfsAdapter> = match params.mode {
            VfsMode::Off => Arc::new(OffVfs::new(params)),
            VfsMode::Suffix => Arc::new(SuffixVfs::new(params)),
            // Allowed by the probe only on platforms shipping the system
            // integration, which this build does not.
            VfsMode::CloudFiles | VfsMode::FileProvider => {
                return Err(ExitInfo::new(
                    ExitCode::SystemError,
                    ExitCause::UnableToCreateVfs,
                ));
            }
        };
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::DefaultProbe;
    use std::path::PathBuf;

    fn params(mode: VfsMode) -> VfsSetupParams {
        VfsSetupParams {
            sync_db_id: 1,
            local_path: PathBuf::from("/tmp/sync"),
            target_path: "/Remote".to_string(),
            mode,
        }
    }

    #[test]
    fn test_factory_creates_allowed_modes() {
        let factory = DefaultVfsFactory::new(Arc::new(DefaultProbe));

        let off = factory.create(params(VfsMode::Off)).unwrap();
        assert_eq!(off.mode(), VfsMode::Off);

        let suffix = factory.create(params(VfsMode::Suffix)).unwrap();
        assert_eq!(suffix.mode(), VfsMode::Suffix);
    }

    #[test]
    fn test_factory_refuses_denied_mode_with_lite_sync_cause() {
        let factory = DefaultVfsFactory::new(Arc::new(DefaultProbe));
        let err = factory.create(params(VfsMode::CloudFiles)).unwrap_err();
        assert_eq!(err.code, ExitCode::SystemError);
        assert_eq!(err.cause, ExitCause::LiteSyncNotAllowed);
    }
}
