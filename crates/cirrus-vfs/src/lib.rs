//! Cirrus VFS - virtual-filesystem backends
//!
//! Implements the `VfsAdapter` port from `cirrus-core` for the modes this
//! platform can serve:
//!
//! - [`SuffixVfs`] - portable placeholder files carrying a reserved suffix,
//!   usable on any filesystem without kernel support
//! - [`OffVfs`] - the no-op backend used while virtual files are disabled
//!
//! System-provider modes (cloud files, file provider) have no backend here;
//! [`DefaultProbe`] reports them as unavailable and the factory refuses
//! them with `LiteSyncNotAllowed`.

pub mod factory;
pub mod off;
pub mod probe;
pub mod suffix;

pub use factory::DefaultVfsFactory;
pub use off::OffVfs;
pub use probe::DefaultProbe;
pub use suffix::{wipe_placeholders, SuffixVfs, PLACEHOLDER_SUFFIX};
