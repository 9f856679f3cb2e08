//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! A node only carries bookkeeping (edges, dirty state, version); the typed
//! value lives in the `Cell`/`Derived` handle that owns the node.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

/// Unique identifier for a node in the dependency graph.
///
/// IDs are allocated from a monotonic counter, so ordering IDs gives the
/// order in which nodes were created. The scheduler relies on this to run
/// effects in subscription order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A mutable cell. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Cell,

    /// A derived node. These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents.
    Effect,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// One of the node's inputs was notified. Whether the input value
    /// actually changed is checked lazily, by comparing versions.
    MaybeDirty,

    /// The node has never been evaluated and must run.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Bumped every time the node's externally visible value changes.
    version: u64,

    /// Set while a derived node evaluates; re-entering it is a cycle.
    computing: bool,

    label: Option<String>,

    /// Nodes this node read during its last run, with the version seen.
    /// Insertion order is read order.
    dependencies: IndexMap<NodeId, u64>,

    /// Nodes that read this node. Insertion order is subscription order.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            dirty: match kind {
                NodeKind::Cell => DirtyState::Clean,
                NodeKind::Derived | NodeKind::Effect => DirtyState::Dirty,
            },
            version: 0,
            computing: false,
            label: None,
            dependencies: IndexMap::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Create a new cell node.
    pub fn cell() -> Self {
        Self::new(NodeKind::Cell)
    }

    /// Create a new derived node.
    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new effect node.
    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty. Has no effect on cells, and never
    /// downgrades a node that was never evaluated.
    pub fn mark_maybe_dirty(&mut self) {
        if self.kind != NodeKind::Cell && self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Restore a dirty state saved before a failed evaluation.
    pub fn restore_dirty_state(&mut self, state: DirtyState) {
        self.dirty = state;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record that the node's value changed.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn is_computing(&self) -> bool {
        self.computing
    }

    pub fn set_computing(&mut self, computing: bool) {
        self.computing = computing;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    /// Human readable name used in errors and logs.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.id.to_string(),
        }
    }

    /// Add a dependency (a node that this node reads from).
    pub fn add_dependency(&mut self, node_id: NodeId, version: u64) {
        self.dependencies.insert(node_id, version);
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    /// All dependencies with the version seen when they were read.
    pub fn dependencies(&self) -> &IndexMap<NodeId, u64> {
        &self.dependencies
    }

    /// Add a dependent (a node that reads from this node).
    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub fn clear_dependencies(&mut self) {
        self.dependencies.clear();
    }
}
