//! Cirrus Jobs - bounded background work
//!
//! Long-running work never executes on the dispatch task. It is queued
//! here instead:
//!
//! - [`JobPool`] - bounded worker pool with priority levels and adaptive
//!   capacity (shrunk when the transport layer reports socket exhaustion)
//! - [`log_upload`] - chunked, resumable, cancellable support-log upload
//! - [`folder_size`] - recursive folder-size computation

pub mod folder_size;
pub mod log_upload;
pub mod pool;

pub use folder_size::compute_folder_size;
pub use log_upload::{LogTransport, LogUploadJob};
pub use pool::{JobPool, JobPriority};
