//! Platform virtualization capability probe

use cirrus_core::domain::VfsMode;
use cirrus_core::ports::VirtualizationProbe;

/// Capability probe for this platform.
///
/// The suffix backend needs nothing beyond a writable folder, so it is
/// always allowed. The system-provider modes require OS integrations this
/// platform does not ship.
#[derive(Debug, Default)]
pub struct DefaultProbe;

impl VirtualizationProbe for DefaultProbe {
    fn is_allowed(&self, mode: VfsMode) -> bool {
        matches!(mode, VfsMode::Off | VfsMode::Suffix)
    }
}
