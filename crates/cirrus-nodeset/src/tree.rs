//! Folder decision tree and set reconciliation
//!
//! The tree mirrors the portion of the remote folder hierarchy the user has
//! explored. Each folder carries a check state; user actions propagate down
//! to descendants and up to ancestors under the following rules:
//!
//! - checking a folder checks its whole subtree
//! - a parent becomes checked only when every child is checked
//! - unchecking any child demotes a checked parent to partially checked,
//!   never to unchecked; the root can never become fully unchecked
//!
//! Reconciliation turns the tree plus the previously persisted black and
//! undecided sets into fresh black/white sets:
//!
//! 1. `new_black` starts as `old_undecided ∪ old_black`
//! 2. every explicitly unchecked folder joins `new_black`
//! 3. every checked folder removes itself and its tracked descendants
//!    from `new_black`
//! 4. `new_white = (old_undecided ∪ old_black) − new_black`
//!
//! The caller persists both sets and clears the undecided set.

use std::collections::HashSet;

use cirrus_core::domain::NodeId;

/// Check state of one folder in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Checked,
    PartiallyChecked,
    Unchecked,
}

/// Handle to a node inside a [`DecisionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef(usize);

#[derive(Debug)]
struct Node {
    id: NodeId,
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    state: CheckState,
}

/// Sets produced by one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub black: HashSet<NodeId>,
    pub white: HashSet<NodeId>,
}

/// In-memory mirror of the explored folder hierarchy.
///
/// The previously persisted black and undecided sets are frozen at
/// construction; they seed the initial check states and stay the reference
/// point for [`DecisionTree::newly_blacklisted`] until the next pass.
#[derive(Debug)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    old_black: HashSet<NodeId>,
    old_undecided: HashSet<NodeId>,
}

impl DecisionTree {
    /// Creates a tree holding only the sync root, which starts checked.
    pub fn new(
        root_id: NodeId,
        root_name: impl Into<String>,
        old_black: HashSet<NodeId>,
        old_undecided: HashSet<NodeId>,
    ) -> Self {
        let root = Node {
            id: root_id,
            name: root_name.into(),
            parent: None,
            children: Vec::new(),
            state: CheckState::Checked,
        };
        Self {
            nodes: vec![root],
            old_black,
            old_undecided,
        }
    }

    pub fn root(&self) -> NodeRef {
        NodeRef(0)
    }

    pub fn state(&self, node: NodeRef) -> CheckState {
        self.nodes[node.0].state
    }

    pub fn id(&self, node: NodeRef) -> &NodeId {
        &self.nodes[node.0].id
    }

    pub fn name(&self, node: NodeRef) -> &str {
        &self.nodes[node.0].name
    }

    pub fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.nodes[node.0].children.iter().map(|&i| NodeRef(i)).collect()
    }

    /// Inserts a newly explored folder under `parent`.
    ///
    /// The initial state follows the persisted sets: a folder previously
    /// blacklisted or undecided starts unchecked (demoting checked
    /// ancestors to partially checked), a folder under an unchecked parent
    /// inherits unchecked, everything else starts checked.
    pub fn add_child(&mut self, parent: NodeRef, id: NodeId, name: impl Into<String>) -> NodeRef {
        let parent_state = self.nodes[parent.0].state;
        let excluded = self.old_black.contains(&id) || self.old_undecided.contains(&id);
        let state = if parent_state == CheckState::Unchecked || excluded {
            CheckState::Unchecked
        } else {
            CheckState::Checked
        };

        let idx = self.nodes.len();
        self.nodes.push(Node {
            id,
            name: name.into(),
            parent: Some(parent.0),
            children: Vec::new(),
            state,
        });
        self.nodes[parent.0].children.push(idx);

        if state == CheckState::Unchecked && parent_state != CheckState::Unchecked {
            self.refresh_ancestors(idx);
        }
        NodeRef(idx)
    }

    /// Applies one user decision and propagates it through the tree.
    pub fn set_checked(&mut self, node: NodeRef, checked: bool) {
        if checked {
            self.set_subtree(node.0, CheckState::Checked);
            self.refresh_ancestors(node.0);
        } else if node.0 == 0 {
            // The root can never become fully unchecked.
            for child in self.nodes[0].children.clone() {
                self.set_subtree(child, CheckState::Unchecked);
            }
            self.nodes[0].state = if self.nodes[0].children.is_empty() {
                CheckState::Checked
            } else {
                CheckState::PartiallyChecked
            };
        } else {
            self.set_subtree(node.0, CheckState::Unchecked);
            self.refresh_ancestors(node.0);
        }
    }

    /// Reconciles the tree into fresh black/white sets.
    pub fn reconcile(&self) -> ReconcileOutcome {
        let universe: HashSet<NodeId> =
            self.old_black.union(&self.old_undecided).cloned().collect();
        let mut black = universe.clone();

        self.collect_black(0, &mut black);

        let white: HashSet<NodeId> = universe.difference(&black).cloned().collect();

        tracing::debug!(
            black = black.len(),
            white = white.len(),
            "Reconciled node sets"
        );
        ReconcileOutcome { black, white }
    }

    /// Nodes blacklisted for the first time since the last synchronization.
    ///
    /// A node qualifies when it is currently unchecked and neither it nor
    /// any ancestor was already in the persisted black or undecided sets.
    pub fn newly_blacklisted(&self) -> HashSet<NodeId> {
        let mut out = HashSet::new();
        self.walk_newly_blacklisted(0, false, &mut out);
        out
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn set_subtree(&mut self, idx: usize, state: CheckState) {
        self.nodes[idx].state = state;
        for child in self.nodes[idx].children.clone() {
            self.set_subtree(child, state);
        }
    }

    /// Re-derives ancestor states after a change below them. A parent is
    /// checked only when every child is checked; otherwise it is partially
    /// checked. Parents are never driven to unchecked by propagation.
    fn refresh_ancestors(&mut self, mut idx: usize) {
        while let Some(parent) = self.nodes[idx].parent {
            let all_checked = self.nodes[parent]
                .children
                .iter()
                .all(|&c| self.nodes[c].state == CheckState::Checked);
            self.nodes[parent].state = if all_checked {
                CheckState::Checked
            } else {
                CheckState::PartiallyChecked
            };
            idx = parent;
        }
    }

    fn collect_black(&self, idx: usize, black: &mut HashSet<NodeId>) {
        match self.nodes[idx].state {
            CheckState::Unchecked => {
                // The subtree root covers its descendants.
                black.insert(self.nodes[idx].id.clone());
            }
            CheckState::Checked => {
                self.remove_subtree(idx, black);
            }
            CheckState::PartiallyChecked => {
                black.remove(&self.nodes[idx].id);
                for &child in &self.nodes[idx].children {
                    self.collect_black(child, black);
                }
            }
        }
    }

    fn remove_subtree(&self, idx: usize, black: &mut HashSet<NodeId>) {
        black.remove(&self.nodes[idx].id);
        for &child in &self.nodes[idx].children {
            self.remove_subtree(child, black);
        }
    }

    fn walk_newly_blacklisted(
        &self,
        idx: usize,
        ancestor_excluded: bool,
        out: &mut HashSet<NodeId>,
    ) {
        let node = &self.nodes[idx];
        let excluded = ancestor_excluded
            || self.old_black.contains(&node.id)
            || self.old_undecided.contains(&node.id);

        if node.state == CheckState::Unchecked && !excluded {
            out.insert(node.id.clone());
        }
        for &child in &node.children {
            self.walk_newly_blacklisted(child, excluded, out);
        }
    }
}
