//! Cirrus NodeSet - selective-sync decisions
//!
//! Maintains the three per-sync sets of remote node identifiers (blacklist,
//! whitelist, undecided) and the folder decision tree that turns a user's
//! check/uncheck actions into updates of those sets.
//!
//! ## Key Components
//!
//! - [`DecisionTree`] - in-memory mirror of the remote folder tree with
//!   per-folder check states and propagation rules
//! - [`ReconcileOutcome`] - the black/white sets produced by one
//!   reconciliation pass

pub mod tree;

pub use tree::{CheckState, DecisionTree, NodeRef, ReconcileOutcome};
