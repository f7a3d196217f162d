//! Core domain types and ports for Cirrus
//!
//! This crate holds everything shared across the workspace: the durable
//! entities (users, accounts, drives, syncs, recorded errors, process
//! state), the `(ExitCode, ExitCause)` failure taxonomy, the typed YAML
//! configuration, and the ports through which the orchestrator consumes
//! its per-sync collaborators (supervisor, virtual-filesystem adapter,
//! telemetry).

pub mod config;
pub mod domain;
pub mod errors;
pub mod ports;

pub use config::Config;
pub use errors::{DomainError, ExitCause, ExitCode, ExitInfo, ExitResult};
