//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a reactive context (derived/effect), the
//!    read is recorded and becomes a dependency edge.
//!
//! 2. When a cell's value changes, the runtime marks every dependent as
//!    maybe dirty and queues reachable effects.
//!
//! 3. Writing a value that compares equal to the current one does nothing.
//!
//! # Memory Layout
//!
//! Each cell consists of:
//! - A node in the runtime graph (edges, version)
//! - The value, behind an `Rc<RefCell<_>>` shared by all clones
//! - The equality predicate

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use crate::graph::{Node, NodeId};

/// Equality predicate used to decide whether a new value is a change.
pub type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

struct CellInner<T> {
    id: NodeId,
    value: RefCell<T>,
    equals: Equality<T>,
    runtime: WeakRuntime,
    disposed: std::cell::Cell<bool>,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        if !self.disposed.get() {
            if let Some(runtime) = self.runtime.upgrade() {
                runtime.unregister(self.id);
            }
        }
    }
}

/// A mutable reactive value.
///
/// Clones share the same value and graph node.
///
/// # Example
///
/// ```
/// use glint_core::{Cell, Runtime};
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 0);
///
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

impl<T: 'static> Cell<T> {
    /// Create a new cell compared with `PartialEq`.
    pub fn new(runtime: &Runtime, value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(runtime, value, |a: &T, b: &T| a == b)
    }

    /// Create a new cell with a custom equality predicate.
    ///
    /// A predicate that always returns `false` turns every `set` into a
    /// notification.
    pub fn with_equality(
        runtime: &Runtime,
        value: T,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let id = runtime.register(Node::cell(), None);
        Self {
            inner: Rc::new(CellInner {
                id,
                value: RefCell::new(value),
                equals: Rc::new(equals),
                runtime: runtime.downgrade(),
                disposed: std::cell::Cell::new(false),
            }),
        }
    }

    /// Attach a debug label, used in logs and errors.
    pub fn with_label(self, label: &str) -> Self {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.set_label(self.inner.id, label);
        }
        self
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, registering a dependency.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, registering a dependency.
    ///
    /// The value stays borrowed while `f` runs, so `f` must not write to
    /// this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Get the current value without registering a dependency.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Set a new value, notifying dependents if it differs from the current
    /// one.
    pub fn set(&self, value: T) {
        if self.inner.disposed.get() {
            tracing::debug!(cell = %self.inner.id, "set on disposed cell ignored");
            return;
        }

        let unchanged = (self.inner.equals)(&self.inner.value.borrow(), &value);
        if unchanged {
            tracing::debug!(cell = %self.inner.id, "set with equal value ignored");
            return;
        }

        let previous = self.inner.value.replace(value);
        drop(previous);
        self.notify();
    }

    /// Compute a new value from the current one and set it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }

    /// Notify dependents without changing the value.
    ///
    /// Useful after mutating the contents in place, or for cells whose
    /// identity, not content, is the signal.
    pub fn notify(&self) {
        if self.inner.disposed.get() {
            return;
        }
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.mark_changed(self.inner.id);
        }
    }

    /// Detach the cell from the graph. Further writes are ignored.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.unregister(self.inner.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Compare two values with this cell's equality predicate.
    pub fn equals(&self, a: &T, b: &T) -> bool {
        (self.inner.equals)(a, b)
    }

    pub(crate) fn equality(&self) -> Equality<T> {
        self.inner.equals.clone()
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        self.inner.runtime.upgrade()
    }

    fn track(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track_read(self.inner.id);
        }
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}
