//! Domain entities of the orchestration subsystem.

pub mod app_state;
pub mod drive;
pub mod error_record;
pub mod node_set;
pub mod sync;
pub mod user;

pub use app_state::{AppStateKey, LogUploadState, SELF_RESTART_DISABLED};
pub use drive::Drive;
pub use error_record::{ErrorLevel, ErrorRecord};
pub use node_set::{NodeId, NodeSetKind};
pub use sync::{is_sub_dir, Sync, SyncStatus, VfsMode};
pub use user::{Account, User};
