//! Readable nodes.
//!
//! `Source` is the uniform handle accepted by everything that watches a
//! node: `subscribe`, `observe`, `mapped` and the server selectors.

use std::fmt;

use super::cell::{Cell, Equality};
use super::derived::Derived;
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::NodeId;

/// Either a cell or a derived node.
pub enum Source<T: 'static> {
    Cell(Cell<T>),
    Derived(Derived<T>),
}

impl<T: 'static> Source<T> {
    pub fn id(&self) -> NodeId {
        match self {
            Source::Cell(cell) => cell.id(),
            Source::Derived(derived) => derived.id(),
        }
    }

    /// Read the value, registering a dependency.
    pub fn read(&self) -> Result<T>
    where
        T: Clone,
    {
        match self {
            Source::Cell(cell) => Ok(cell.get()),
            Source::Derived(derived) => derived.get(),
        }
    }

    /// Borrow the value, registering a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        match self {
            Source::Cell(cell) => Ok(cell.with(f)),
            Source::Derived(derived) => derived.with(f),
        }
    }

    /// Read the value without registering a dependency.
    pub fn peek(&self) -> Result<T>
    where
        T: Clone,
    {
        match self {
            Source::Cell(cell) => Ok(cell.peek()),
            Source::Derived(derived) => derived.peek(),
        }
    }

    /// Compare two values with the node's equality predicate.
    pub fn equals(&self, a: &T, b: &T) -> bool {
        match self {
            Source::Cell(cell) => cell.equals(a, b),
            Source::Derived(derived) => derived.equals(a, b),
        }
    }

    pub(crate) fn equality(&self) -> Equality<T> {
        match self {
            Source::Cell(cell) => cell.equality(),
            Source::Derived(derived) => derived.equality(),
        }
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        match self {
            Source::Cell(cell) => cell.runtime(),
            Source::Derived(derived) => derived.runtime(),
        }
    }

    /// Run `f` without tracking if the runtime is still alive.
    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.runtime() {
            Some(runtime) => runtime.untracked(f),
            None => f(),
        }
    }
}

impl<T: 'static> Clone for Source<T> {
    fn clone(&self) -> Self {
        match self {
            Source::Cell(cell) => Source::Cell(cell.clone()),
            Source::Derived(derived) => Source::Derived(derived.clone()),
        }
    }
}

impl<T: 'static> From<Cell<T>> for Source<T> {
    fn from(cell: Cell<T>) -> Self {
        Source::Cell(cell)
    }
}

impl<T: 'static> From<&Cell<T>> for Source<T> {
    fn from(cell: &Cell<T>) -> Self {
        Source::Cell(cell.clone())
    }
}

impl<T: 'static> From<Derived<T>> for Source<T> {
    fn from(derived: Derived<T>) -> Self {
        Source::Derived(derived)
    }
}

impl<T: 'static> From<&Derived<T>> for Source<T> {
    fn from(derived: &Derived<T>) -> Self {
        Source::Derived(derived.clone())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Cell(cell) => f.debug_tuple("Cell").field(cell).finish(),
            Source::Derived(derived) => f.debug_tuple("Derived").field(derived).finish(),
        }
    }
}
