//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between cells, derived values and effects.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent cells, derived values or effects
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a cell changes, we traverse the graph to find all affected nodes
//! and mark them as maybe dirty. Whether a marked node actually needs to
//! recompute is decided later by comparing dependency versions.
//!
//! # Design Decisions
//!
//! 1. We use a centralized graph rather than per-node linked lists because:
//!    - It keeps all bookkeeping behind one borrow in the runtime
//!    - It simplifies cycle and staleness checks
//!    - Typed values stay in their handles, so the graph is not generic
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable traversal in both directions. Both are insertion-ordered so
//!    that notification order is deterministic.

mod node;
mod scheduler;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
