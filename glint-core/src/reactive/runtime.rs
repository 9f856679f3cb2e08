//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, derived
//! values and effects. It owns the dependency graph, the capture-frame
//! stack and the transaction state, and it drives propagation.
//!
//! # How It Works
//!
//! 1. When a cell or derived node is created, it registers with the
//!    runtime.
//!
//! 2. When a derived node or effect reads another node, the runtime records
//!    the read (and the version seen) in the innermost capture frame.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Bumps the cell's version
//!    b. Marks every reachable node as "maybe dirty"
//!    c. Queues reachable effects
//!    d. Flushes the queue once the outermost transaction closes
//!
//! 4. Derived nodes are lazy: they settle on the next read, or when an
//!    effect that depends on them checks whether it needs to re-run.
//!
//! # Ownership
//!
//! Several runtimes can coexist. Each node holds a weak reference to its
//! runtime, and the runtime only holds weak references to cells and derived
//! nodes. Effects are the exception: they are kept alive by the runtime
//! until disposed, since nothing else references them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::{FrameKind, ReactiveContext};
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, Node, NodeId, NodeKind, UpdateScheduler};

/// Upper bound on flush rounds before effects are considered runaway.
const MAX_FLUSH_ROUNDS: usize = 100;

/// A type-erased node that the runtime can (re)run.
pub(crate) trait Reactive {
    /// Run the node's function. The runtime has already installed a capture
    /// frame owned by the node. Returns whether the node's externally
    /// visible value changed.
    fn run(&self, runtime: &Runtime) -> Result<bool>;
}

struct RuntimeInner {
    scheduler: RefCell<UpdateScheduler>,

    /// Maps node IDs to weak references to avoid preventing cleanup.
    registry: RefCell<HashMap<NodeId, Weak<dyn Reactive>>>,

    /// Effects, kept alive until disposed.
    retained: RefCell<HashMap<NodeId, Rc<dyn Reactive>>>,

    context: ReactiveContext,

    flushing: std::cell::Cell<bool>,

    /// Nodes dropped while the graph was borrowed; removed on next flush.
    orphans: RefCell<Vec<NodeId>>,
}

/// Handle to a reactive runtime.
///
/// Cloning the handle is cheap and shares the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// Weak handle held by nodes.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl Runtime {
    /// Create a new, empty runtime.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                scheduler: RefCell::new(UpdateScheduler::new()),
                registry: RefCell::new(HashMap::new()),
                retained: RefCell::new(HashMap::new()),
                context: ReactiveContext::new(),
                flushing: std::cell::Cell::new(false),
                orphans: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Run `f` inside a transaction.
    ///
    /// Notifications are deferred until the outermost transaction closes;
    /// effects then run once, observing only the final values.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.scheduler.borrow_mut().begin_batch();
        let _guard = BatchGuard { runtime: self };
        f()
    }

    /// Run `f` and return the nodes it read along with its result.
    ///
    /// Captures nest: reads made inside an inner `capture` are also visible
    /// to the enclosing one. Reads made by a derived node while it evaluates
    /// are not; the outer capture records the derived node itself.
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> (Vec<NodeId>, R) {
        let guard = self.inner.context.enter(FrameKind::Capture);
        let result = f();
        let reads = guard.finish();
        (reads.into_keys().collect(), result)
    }

    /// Run `f` without registering any dependency.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.context.enter(FrameKind::Untracked);
        f()
    }

    /// Whether a transaction is open.
    pub fn is_batching(&self) -> bool {
        self.inner.scheduler.borrow().is_batching()
    }

    /// Whether reads are currently being recorded.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_tracking()
    }

    /// Number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.inner.scheduler.borrow().node_count()
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Add a node to the graph, optionally with the value that runs it.
    pub(crate) fn register(&self, node: Node, reactive: Option<Weak<dyn Reactive>>) -> NodeId {
        let id = self.inner.scheduler.borrow_mut().add_node(node);
        if let Some(reactive) = reactive {
            self.inner.registry.borrow_mut().insert(id, reactive);
        }
        id
    }

    /// Keep a node alive until it is unregistered.
    pub(crate) fn retain(&self, id: NodeId, reactive: Rc<dyn Reactive>) {
        self.inner.retained.borrow_mut().insert(id, reactive);
    }

    /// Remove a node and every edge touching it.
    ///
    /// Safe to call from `Drop`: if the graph is busy, removal is deferred.
    pub(crate) fn unregister(&self, id: NodeId) {
        match self.inner.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => {
                scheduler.remove_node(id);
            }
            Err(_) => {
                self.inner.orphans.borrow_mut().push(id);
                return;
            }
        }

        if let Ok(mut registry) = self.inner.registry.try_borrow_mut() {
            registry.remove(&id);
        }

        // Dropped after the borrow is released: the node's closure may own
        // handles whose own drop comes back here.
        let retained = self
            .inner
            .retained
            .try_borrow_mut()
            .ok()
            .and_then(|mut retained| retained.remove(&id));
        drop(retained);
    }

    fn purge_orphans(&self) {
        let orphans = std::mem::take(&mut *self.inner.orphans.borrow_mut());
        for id in orphans {
            self.unregister(id);
        }
    }

    pub(crate) fn set_label(&self, id: NodeId, label: &str) {
        if let Some(node) = self.inner.scheduler.borrow_mut().get_node_mut(id) {
            node.set_label(label);
        }
    }

    pub(crate) fn display_name(&self, id: NodeId) -> String {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map(Node::display_name)
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn dirty_state(&self, id: NodeId) -> Option<DirtyState> {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map(Node::dirty_state)
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map(|node| node.dependencies().len())
            .unwrap_or(0)
    }

    pub(crate) fn dependent_count(&self, id: NodeId) -> usize {
        self.inner
            .scheduler
            .borrow()
            .get_node(id)
            .map(|node| node.dependents().len())
            .unwrap_or(0)
    }

    /// Record a read of `id` in the innermost frame.
    pub(crate) fn track_read(&self, id: NodeId) {
        if !self.inner.context.is_tracking() {
            return;
        }
        let version = self.inner.scheduler.borrow().version(id);
        if let Some(version) = version {
            self.inner.context.record(id, version);
        }
    }

    /// Run `f` in a frame owned by `owner` and return what it read.
    fn track<R>(&self, owner: NodeId, f: impl FnOnce() -> R) -> (IndexMap<NodeId, u64>, R) {
        let guard = self.inner.context.enter(FrameKind::Owned(owner));
        let result = f();
        (guard.finish(), result)
    }

    /// Propagate a change of `id` and flush unless a transaction is open.
    pub(crate) fn mark_changed(&self, id: NodeId) {
        let (affected, batching) = {
            let mut scheduler = self.inner.scheduler.borrow_mut();
            let affected = scheduler.mark_changed(id);
            (affected.len(), scheduler.is_batching())
        };

        tracing::trace!(node = %id, affected, batching, "cell changed");

        if !batching {
            self.flush();
        }
    }

    /// Bring a derived node up to date.
    ///
    /// Reading a node that is currently evaluating is a cycle.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<()> {
        let state = {
            let scheduler = self.inner.scheduler.borrow();
            let Some(node) = scheduler.get_node(id) else {
                return Ok(());
            };
            if node.is_computing() {
                return Err(ReactiveError::Cycle {
                    node: node.display_name(),
                });
            }
            if node.kind() != NodeKind::Derived {
                return Ok(());
            }
            node.dirty_state()
        };

        match state {
            DirtyState::Clean => Ok(()),
            DirtyState::MaybeDirty => {
                if self.dependencies_changed(id)? {
                    self.evaluate(id)
                } else {
                    self.mark_clean(id);
                    Ok(())
                }
            }
            DirtyState::Dirty => self.evaluate(id),
        }
    }

    /// Settle every recorded dependency of `id`, in read order, and report
    /// whether any of them moved past the version `id` saw.
    fn dependencies_changed(&self, id: NodeId) -> Result<bool> {
        let dependencies: SmallVec<[(NodeId, u64); 8]> = self
            .inner
            .scheduler
            .borrow()
            .get_node(id)
            .map(|node| {
                node.dependencies()
                    .iter()
                    .map(|(dep, version)| (*dep, *version))
                    .collect()
            })
            .unwrap_or_default();

        for (dep, seen) in dependencies {
            self.refresh(dep)?;
            let current = self.inner.scheduler.borrow().version(dep);
            if matches!(current, Some(version) if version != seen) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn mark_clean(&self, id: NodeId) {
        if let Some(node) = self.inner.scheduler.borrow_mut().get_node_mut(id) {
            node.mark_clean();
        }
    }

    fn lookup(&self, id: NodeId) -> Option<Rc<dyn Reactive>> {
        self.inner
            .registry
            .borrow()
            .get(&id)
            .and_then(Weak::upgrade)
    }

    /// Recompute a derived node.
    ///
    /// On failure, or if the computation panics, the node's dirty state and
    /// dependencies are left as they were, so the next read retries from the
    /// same state.
    fn evaluate(&self, id: NodeId) -> Result<()> {
        let Some(reactive) = self.lookup(id) else {
            return Ok(());
        };

        let previous = {
            let mut scheduler = self.inner.scheduler.borrow_mut();
            let Some(node) = scheduler.get_node_mut(id) else {
                return Ok(());
            };
            let previous = node.dirty_state();
            node.set_computing(true);
            node.mark_clean();
            previous
        };

        let rollback = EvaluationGuard {
            runtime: self,
            id,
            previous,
        };
        let (reads, changed) = self.track(id, || reactive.run(self));
        let changed = changed?;
        std::mem::forget(rollback);

        let mut scheduler = self.inner.scheduler.borrow_mut();
        if let Some(node) = scheduler.get_node_mut(id) {
            node.set_computing(false);
            if changed {
                node.bump_version();
            }
        }
        scheduler.replace_dependencies(id, reads);
        tracing::trace!(node = %id, changed, "derived recomputed");
        Ok(())
    }

    /// Run an effect if it has never run or one of its inputs changed.
    pub(crate) fn run_effect(&self, id: NodeId) -> Result<()> {
        let Some(state) = self.dirty_state(id) else {
            return Ok(());
        };

        match state {
            DirtyState::Clean => return Ok(()),
            DirtyState::MaybeDirty => {
                let changed = self.dependencies_changed(id);
                if !matches!(changed, Ok(true)) {
                    self.mark_clean(id);
                    return changed.map(|_| ());
                }
            }
            DirtyState::Dirty => {}
        }

        let Some(reactive) = self.lookup(id) else {
            return Ok(());
        };
        self.mark_clean(id);

        let (reads, result) = self.track(id, || reactive.run(self));
        result?;

        let mut scheduler = self.inner.scheduler.borrow_mut();
        scheduler.replace_dependencies(id, reads);
        // The effect wrote to something it had already read.
        if scheduler.is_stale(id) {
            scheduler.queue(id);
        }
        Ok(())
    }

    /// Flush pending effects if no transaction is open.
    pub(crate) fn flush_if_idle(&self) {
        let ready = {
            let scheduler = self.inner.scheduler.borrow();
            !scheduler.is_batching() && scheduler.has_pending()
        };
        if ready {
            self.flush();
        }
    }

    /// Run queued effects until the queue stays empty.
    ///
    /// Effects that mutate cells queue further effects; those run in a
    /// follow-up round of the same flush, never interleaved with a round
    /// in progress.
    fn flush(&self) {
        if self.inner.flushing.replace(true) {
            return;
        }
        let _flushing = FlushGuard {
            flag: &self.inner.flushing,
        };

        self.purge_orphans();

        let mut rounds = 0;
        loop {
            let pending = self.inner.scheduler.borrow_mut().take_pending();
            if pending.is_empty() {
                break;
            }

            rounds += 1;
            if rounds > MAX_FLUSH_ROUNDS {
                tracing::error!(
                    rounds,
                    remaining = pending.len(),
                    "effects keep re-triggering each other; aborting flush"
                );
                // Left queued for the next flush.
                let mut scheduler = self.inner.scheduler.borrow_mut();
                for id in pending {
                    scheduler.queue(id);
                }
                break;
            }

            tracing::trace!(round = rounds, effects = pending.len(), "flushing effects");

            for id in pending {
                if let Err(error) = self.run_effect(id) {
                    tracing::error!(effect = %self.display_name(id), %error, "effect failed");
                }
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("node_count", &self.node_count())
            .field("batching", &self.is_batching())
            .finish()
    }
}

struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let outermost = self.runtime.inner.scheduler.borrow_mut().end_batch();
        if outermost && !std::thread::panicking() {
            self.runtime.flush();
        }
    }
}

/// Puts a derived node back the way it was when its evaluation fails or
/// unwinds.
struct EvaluationGuard<'a> {
    runtime: &'a Runtime,
    id: NodeId,
    previous: DirtyState,
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut scheduler) = self.runtime.inner.scheduler.try_borrow_mut() {
            if let Some(node) = scheduler.get_node_mut(self.id) {
                node.set_computing(false);
                node.restore_dirty_state(self.previous);
            }
        }
    }
}

struct FlushGuard<'a> {
    flag: &'a std::cell::Cell<bool>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}
