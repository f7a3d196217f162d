//! Cirrus Sync - per-sync supervision
//!
//! Implements the `SyncSupervisor` port from `cirrus-core`: one supervisor
//! task per configured sync, driving periodic reconciliation passes over
//! the local folder and reacting to lifecycle commands from the
//! orchestrator (start, stop, pause, resume).
//!
//! ## Key Components
//!
//! - [`Supervisor`] - the reconciliation state machine and its tick loop
//! - [`DefaultSupervisorFactory`] - builds supervisors over the shared store

pub mod factory;
pub mod supervisor;

pub use factory::DefaultSupervisorFactory;
pub use supervisor::Supervisor;
