//! Cirrus Daemon - process orchestration
//!
//! The daemon owns every active sync: it validates and starts them,
//! mediates virtual-file mode transitions, records and deduplicates
//! errors, and answers the local IPC protocol used by the presentation
//! process.
//!
//! ## Key Components
//!
//! - [`orchestrator::Orchestrator`] - the singleton owning the supervisor
//!   and adapter registries
//! - [`dispatch::Dispatcher`] - the single task that runs the orchestrator,
//!   the deferred-task queue and the periodic timers
//! - [`watchdog::Watchdog`] - crash-loop detection and restart bookkeeping
//! - [`maintenance`] - one-shot CLI operations run instead of the daemon

pub mod dispatch;
pub mod log_sink;
pub mod maintenance;
pub mod orchestrator;
pub mod paths;
pub mod watchdog;
