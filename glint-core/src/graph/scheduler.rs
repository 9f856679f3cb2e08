//! Update Scheduler
//!
//! The scheduler owns the dependency graph and the transaction state. It
//! decides which nodes are affected by a change and in which order pending
//! effects are delivered.
//!
//! # Algorithm
//!
//! Propagation is push-pull:
//!
//! 1. When a cell changes, its version is bumped and every node reachable
//!    through dependent edges is marked "maybe dirty". Reachable effects are
//!    queued.
//! 2. Nothing is recomputed during the push. When the outermost transaction
//!    closes, the runtime takes the queued effects in subscription order.
//! 3. Before an effect (or a derived node being read) runs, each recorded
//!    dependency is brought up to date first and its version compared with
//!    the version seen at the last run. Only a real difference triggers a
//!    re-run.
//!
//! Because dependencies always settle before their dependents look at them,
//! a diamond-shaped graph never exposes a half-updated state.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};

use super::node::{Node, NodeId, NodeKind};

/// The update scheduler manages the dependency graph and coordinates updates.
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// Transaction nesting depth. Zero means idle.
    depth: usize,

    /// Effects waiting for the outermost transaction to close.
    pending: IndexSet<NodeId>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            depth: 0,
            pending: IndexSet::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and drops it from the
    /// pending queue.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for dep_id in node.dependencies().keys() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        self.pending.shift_remove(&node_id);
        Some(node)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Current version of a node, if it exists.
    pub fn version(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::version)
    }

    /// Add a dependency edge: `dependent` read `dependency` at `version`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId, version: u64) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency, version);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace the dependency set of `node_id` with what it read during its
    /// latest run. Edges to nodes that no longer exist are skipped.
    pub fn replace_dependencies(&mut self, node_id: NodeId, reads: IndexMap<NodeId, u64>) {
        let previous: Vec<NodeId> = match self.nodes.get(&node_id) {
            Some(node) => node.dependencies().keys().copied().collect(),
            None => return,
        };

        for dep_id in previous {
            if !reads.contains_key(&dep_id) {
                if let Some(dep) = self.nodes.get_mut(&dep_id) {
                    dep.remove_dependent(node_id);
                }
            }
        }

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.clear_dependencies();
        }

        for (dep_id, version) in reads {
            if dep_id != node_id && self.nodes.contains_key(&dep_id) {
                self.add_edge(dep_id, node_id, version);
            }
        }
    }

    /// Mark a cell as changed and propagate dirty flags.
    ///
    /// Bumps the cell's version, marks every reachable node as maybe dirty
    /// and queues reachable effects. Returns the affected nodes in
    /// breadth-first order.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut affected = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        match self.nodes.get_mut(&source_id) {
            Some(source) => {
                source.bump_version();
                queue.extend(source.dependents().iter().copied());
            }
            None => return affected,
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_dirty();
                affected.push(node_id);

                if node.kind() == NodeKind::Effect {
                    self.pending.insert(node_id);
                }

                queue.extend(node.dependents().iter().copied());
            }
        }

        affected
    }

    /// Queue an effect for the next flush.
    pub fn queue(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.mark_maybe_dirty();
            self.pending.insert(node_id);
        }
    }

    /// Check whether anything a node read has moved on since it read it.
    pub fn is_stale(&self, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&node_id) else {
            return false;
        };

        node.dependencies().iter().any(|(dep_id, seen)| {
            self.nodes
                .get(dep_id)
                .map(|dep| dep.version() != *seen || !dep.is_clean())
                .unwrap_or(false)
        })
    }

    /// Take the queued effects in subscription order.
    pub fn take_pending(&mut self) -> Vec<NodeId> {
        let mut pending: Vec<NodeId> = self.pending.drain(..).collect();
        pending.sort_unstable();
        pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Open a transaction (or nest into the current one).
    pub fn begin_batch(&mut self) {
        self.depth += 1;
    }

    /// Close a transaction. Returns `true` when the outermost one closed.
    pub fn end_batch(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::DirtyState;

    fn clean(scheduler: &mut UpdateScheduler, ids: &[NodeId]) {
        for id in ids {
            scheduler.get_node_mut(*id).unwrap().mark_clean();
        }
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let id1 = scheduler.add_node(Node::cell());
        let id2 = scheduler.add_node(Node::derived());

        assert_eq!(scheduler.node_count(), 2);

        assert!(scheduler.remove_node(id1).is_some());
        assert_eq!(scheduler.node_count(), 1);
        assert!(scheduler.get_node(id1).is_none());
        assert!(scheduler.get_node(id2).is_some());

        assert!(scheduler.remove_node(id1).is_none());
    }

    #[test]
    fn add_and_remove_edges() {
        let mut scheduler = UpdateScheduler::new();

        let source_id = scheduler.add_node(Node::cell());
        let derived_id = scheduler.add_node(Node::derived());

        scheduler.add_edge(source_id, derived_id, 0);

        assert!(scheduler
            .get_node(source_id)
            .unwrap()
            .dependents()
            .contains(&derived_id));
        assert!(scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .contains_key(&source_id));

        scheduler.remove_edge(source_id, derived_id);

        assert!(!scheduler
            .get_node(source_id)
            .unwrap()
            .dependents()
            .contains(&derived_id));
        assert!(!scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .contains_key(&source_id));
    }

    #[test]
    fn removing_a_node_detaches_its_edges() {
        let mut scheduler = UpdateScheduler::new();
        let source_id = scheduler.add_node(Node::cell());
        let derived_id = scheduler.add_node(Node::derived());
        scheduler.add_edge(source_id, derived_id, 0);

        scheduler.remove_node(source_id);

        assert!(scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .is_empty());
    }

    #[test]
    fn mark_changed_propagates_and_bumps_version() {
        let mut scheduler = UpdateScheduler::new();

        // source -> derived1 -> derived2
        let source_id = scheduler.add_node(Node::cell());
        let derived1_id = scheduler.add_node(Node::derived());
        let derived2_id = scheduler.add_node(Node::derived());

        scheduler.add_edge(source_id, derived1_id, 0);
        scheduler.add_edge(derived1_id, derived2_id, 0);
        clean(&mut scheduler, &[derived1_id, derived2_id]);

        let affected = scheduler.mark_changed(source_id);

        assert_eq!(affected, vec![derived1_id, derived2_id]);
        assert_eq!(scheduler.version(source_id), Some(1));
        assert_eq!(
            scheduler.get_node(derived2_id).unwrap().dirty_state(),
            DirtyState::MaybeDirty
        );
        // Derived versions only move when they actually recompute.
        assert_eq!(scheduler.version(derived1_id), Some(0));
    }

    #[test]
    fn diamond_marks_each_node_once_and_queues_effect_once() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(Node::cell());
        let left = scheduler.add_node(Node::derived());
        let right = scheduler.add_node(Node::derived());
        let effect = scheduler.add_node(Node::effect());

        scheduler.add_edge(source, left, 0);
        scheduler.add_edge(source, right, 0);
        scheduler.add_edge(left, effect, 0);
        scheduler.add_edge(right, effect, 0);
        clean(&mut scheduler, &[left, right, effect]);

        let affected = scheduler.mark_changed(source);
        assert_eq!(affected.len(), 3);
        assert_eq!(scheduler.take_pending(), vec![effect]);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn pending_effects_come_out_in_subscription_order() {
        let mut scheduler = UpdateScheduler::new();

        let a = scheduler.add_node(Node::cell());
        let b = scheduler.add_node(Node::cell());
        let first = scheduler.add_node(Node::effect());
        let second = scheduler.add_node(Node::effect());
        scheduler.add_edge(b, first, 0);
        scheduler.add_edge(a, second, 0);
        clean(&mut scheduler, &[first, second]);

        scheduler.mark_changed(a);
        scheduler.mark_changed(b);

        assert_eq!(scheduler.take_pending(), vec![first, second]);
    }

    #[test]
    fn replace_dependencies_rewires_edges() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::cell());
        let b = scheduler.add_node(Node::cell());
        let derived = scheduler.add_node(Node::derived());
        scheduler.add_edge(a, derived, 0);

        let mut reads = IndexMap::new();
        reads.insert(b, 4);
        scheduler.replace_dependencies(derived, reads);

        assert!(scheduler.get_node(a).unwrap().dependents().is_empty());
        assert!(scheduler.get_node(b).unwrap().dependents().contains(&derived));
        assert_eq!(
            scheduler.get_node(derived).unwrap().dependencies().get(&b),
            Some(&4)
        );
    }

    #[test]
    fn staleness_compares_versions() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.add_node(Node::cell());
        let effect = scheduler.add_node(Node::effect());
        scheduler.add_edge(cell, effect, 0);

        assert!(!scheduler.is_stale(effect));
        scheduler.mark_changed(cell);
        assert!(scheduler.is_stale(effect));
    }

    #[test]
    fn batch_depth_nests() {
        let mut scheduler = UpdateScheduler::new();
        assert!(!scheduler.is_batching());

        scheduler.begin_batch();
        scheduler.begin_batch();
        assert!(!scheduler.end_batch());
        assert!(scheduler.is_batching());
        assert!(scheduler.end_batch());
        assert!(!scheduler.is_batching());
    }
}
