//! Ports (trait contracts) between the orchestrator and its collaborators.

pub mod supervisor;
pub mod telemetry;
pub mod vfs;

pub use supervisor::{StopOptions, SupervisorFactory, SyncSupervisor};
pub use telemetry::{ErrorTelemetry, LogOnlyTelemetry};
pub use vfs::{PinState, VfsAdapter, VfsFactory, VfsSetupParams, VfsStatus, VirtualizationProbe};
