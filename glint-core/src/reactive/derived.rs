//! Derived Implementation
//!
//! A Derived node is a cached value computed from other reactive nodes. It
//! re-evaluates only when one of its dependencies actually changed.
//!
//! # How Derived Nodes Work
//!
//! 1. Nothing runs at construction. The first read evaluates the function
//!    and caches the result.
//!
//! 2. When an input is notified, the node is marked "maybe dirty".
//!
//! 3. On the next read, each recorded dependency is brought up to date and
//!    its version compared with the one seen at the last evaluation.
//!
//! 4. If a version differs, recompute. Otherwise, mark clean and return the
//!    cache.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A cell changes
//! - 10 derived nodes depend on it
//! - Only the ones actually read will recompute
//! - Nodes that are never read stay dirty (no wasted work)
//!
//! A recomputation that produces a value equal to the cached one does not
//! bump the node's version, so nodes further downstream skip their own work.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::cell::Equality;
use super::runtime::{Reactive, Runtime, WeakRuntime};
use crate::error::{ReactiveError, Result};
use crate::graph::{DirtyState, Node, NodeId};

struct DerivedInner<T> {
    id: NodeId,

    compute: Box<dyn Fn() -> Result<T>>,

    /// The cached value (`None` if never computed). Shared so readers can
    /// hold it while the node recomputes.
    value: RefCell<Option<Rc<T>>>,

    equals: Equality<T>,
    runtime: WeakRuntime,
}

impl<T: 'static> Reactive for DerivedInner<T> {
    fn run(&self, _runtime: &Runtime) -> Result<bool> {
        let next = (self.compute)()?;

        let changed = match &*self.value.borrow() {
            Some(current) => !(self.equals)(current.as_ref(), &next),
            None => true,
        };

        if changed {
            let previous = self.value.replace(Some(Rc::new(next)));
            drop(previous);
        }

        Ok(changed)
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister(self.id);
        }
    }
}

/// A cached value derived from other cells and derived nodes.
///
/// # Example
///
/// ```
/// use glint_core::{Cell, Derived, Runtime};
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 2);
///
/// let doubled = Derived::new(&rt, {
///     let count = count.clone();
///     move || Ok(count.get() * 2)
/// });
///
/// assert_eq!(doubled.get(), Ok(4));
/// count.set(5);
/// assert_eq!(doubled.get(), Ok(10));
/// ```
pub struct Derived<T: 'static> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: 'static> Derived<T> {
    /// Create a new derived node compared with `PartialEq`.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        T: PartialEq,
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_equality(runtime, compute, |a: &T, b: &T| a == b)
    }

    /// Create a new derived node with a custom equality predicate.
    pub fn with_equality<F>(
        runtime: &Runtime,
        compute: F,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        let node = Node::derived();
        let id = node.id();

        let inner = Rc::new(DerivedInner {
            id,
            compute: Box::new(compute),
            value: RefCell::new(None),
            equals: Rc::new(equals),
            runtime: runtime.downgrade(),
        });

        let reactive: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        runtime.register(node, Some(reactive));

        Self { inner }
    }

    /// Attach a debug label, used in logs and cycle errors.
    pub fn with_label(self, label: &str) -> Self {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.set_label(self.inner.id, label);
        }
        self
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a derived node. Errors from
    /// the computation are returned as-is and leave the cache untouched.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, recomputing if necessary.
    ///
    /// `f` sees the value as of this read, even if it writes to an input
    /// and the node recomputes before `f` returns.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let runtime = self
            .inner
            .runtime
            .upgrade()
            .ok_or(ReactiveError::RuntimeDropped)?;

        runtime.refresh(self.inner.id)?;
        runtime.track_read(self.inner.id);

        let value = self.inner.value.borrow().clone();
        match value {
            Some(value) => Ok(f(value.as_ref())),
            None => Err(ReactiveError::Disposed {
                node: runtime.display_name(self.inner.id),
            }),
        }
    }

    /// Get the current value without registering a dependency.
    ///
    /// Still recomputes if the cache is out of date.
    pub fn peek(&self) -> Result<T>
    where
        T: Clone,
    {
        let runtime = self
            .inner
            .runtime
            .upgrade()
            .ok_or(ReactiveError::RuntimeDropped)?;
        runtime.untracked(|| self.get())
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        self.inner
            .runtime
            .upgrade()
            .and_then(|runtime| runtime.dirty_state(self.inner.id))
            .unwrap_or(DirtyState::Dirty)
    }

    /// Check if the node has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of nodes read during the last successful evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map(|runtime| runtime.dependency_count(self.inner.id))
            .unwrap_or(0)
    }

    /// Number of nodes that read this one during their last run.
    pub fn dependent_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map(|runtime| runtime.dependent_count(self.inner.id))
            .unwrap_or(0)
    }

    /// Compare two values with this node's equality predicate.
    pub fn equals(&self, a: &T, b: &T) -> bool {
        (self.inner.equals)(a, b)
    }

    pub(crate) fn equality(&self) -> Equality<T> {
        self.inner.equals.clone()
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        self.inner.runtime.upgrade()
    }
}

impl<T: 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Cell;
    use std::cell::Cell as Counter;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn counting<T: PartialEq + 'static>(
        rt: &Runtime,
        f: impl Fn() -> T + 'static,
    ) -> (Derived<T>, Rc<Counter<usize>>) {
        let calls = Rc::new(Counter::new(0));
        let calls_clone = calls.clone();
        let derived = Derived::new(rt, move || {
            calls_clone.set(calls_clone.get() + 1);
            Ok(f())
        });
        (derived, calls)
    }

    #[test]
    fn derived_is_lazy_and_memoized() {
        let rt = Runtime::new();
        let count = Cell::new(&rt, 2);
        let count_clone = count.clone();
        let (doubled, calls) = counting(&rt, move || count_clone.get() * 2);

        assert!(!doubled.has_value());
        assert_eq!(doubled.state(), DirtyState::Dirty);
        assert_eq!(calls.get(), 0);

        assert_eq!(doubled.get(), Ok(4));
        assert_eq!(doubled.get(), Ok(4));
        assert_eq!(calls.get(), 1);
        assert_eq!(doubled.state(), DirtyState::Clean);

        count.set(3);
        assert_eq!(doubled.state(), DirtyState::MaybeDirty);
        assert_eq!(calls.get(), 1);

        assert_eq!(doubled.get(), Ok(6));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn equal_results_stop_propagation() {
        let rt = Runtime::new();
        let count = Cell::new(&rt, 2);
        let count_clone = count.clone();
        let (parity, _) = counting(&rt, move || count_clone.get() % 2);
        let parity_clone = parity.clone();
        let (label, label_calls) = counting(&rt, move || {
            if parity_clone.get() == Ok(0) {
                "even"
            } else {
                "odd"
            }
        });

        assert_eq!(label.get(), Ok("even"));
        count.set(4);
        assert_eq!(label.get(), Ok("even"));
        assert_eq!(label_calls.get(), 1);
    }

    #[test]
    fn dependencies_are_dynamic() {
        let rt = Runtime::new();
        let use_left = Cell::new(&rt, true);
        let left = Cell::new(&rt, 1);
        let right = Cell::new(&rt, 2);

        let (flag, l, r) = (use_left.clone(), left.clone(), right.clone());
        let (picked, calls) = counting(&rt, move || if flag.get() { l.get() } else { r.get() });

        assert_eq!(picked.get(), Ok(1));
        assert_eq!(picked.dependency_count(), 2);

        // `right` is not a dependency yet.
        right.set(20);
        assert_eq!(picked.get(), Ok(1));
        assert_eq!(calls.get(), 1);

        use_left.set(false);
        assert_eq!(picked.get(), Ok(20));

        // `left` is no longer a dependency.
        left.set(10);
        assert_eq!(picked.get(), Ok(20));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let slot_clone = slot.clone();

        let looped = Derived::new(&rt, move || {
            let me = slot_clone.borrow().clone();
            match me {
                Some(me) => me.get().map(|v| v + 1),
                None => Ok(0),
            }
        })
        .with_label("looped");
        *slot.borrow_mut() = Some(looped.clone());

        assert_eq!(
            looped.get(),
            Err(ReactiveError::Cycle {
                node: "looped".to_string()
            })
        );
        slot.borrow_mut().take();
    }

    #[test]
    fn mutual_reads_are_a_cycle() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let slot_clone = slot.clone();

        let first = Derived::new(&rt, move || {
            let second = slot_clone.borrow().clone();
            match second {
                Some(second) => second.get().map(|v| v + 1),
                None => Ok(0),
            }
        })
        .with_label("first");
        let first_clone = first.clone();
        let second = Derived::new(&rt, move || first_clone.get().map(|v| v + 1)).with_label("second");
        *slot.borrow_mut() = Some(second.clone());

        assert_eq!(
            first.get(),
            Err(ReactiveError::Cycle {
                node: "first".to_string()
            })
        );
        assert_eq!(
            second.get(),
            Err(ReactiveError::Cycle {
                node: "second".to_string()
            })
        );
        assert_eq!(first.state(), DirtyState::Dirty);
        slot.borrow_mut().take();
    }

    #[test]
    fn panicking_equality_leaves_node_retryable() {
        let rt = Runtime::new();
        let input = Cell::new(&rt, 1);
        let explode = Rc::new(Counter::new(false));

        let (input_clone, explode_clone) = (input.clone(), explode.clone());
        let mirrored = Derived::with_equality(
            &rt,
            move || Ok(input_clone.get()),
            move |a: &i32, b: &i32| {
                if explode_clone.get() {
                    panic!("comparison failed");
                }
                a == b
            },
        );
        assert_eq!(mirrored.get(), Ok(1));

        explode.set(true);
        input.set(2);
        assert!(catch_unwind(AssertUnwindSafe(|| mirrored.get())).is_err());
        assert_eq!(mirrored.state(), DirtyState::MaybeDirty);

        explode.set(false);
        assert_eq!(mirrored.get(), Ok(2));
        input.set(3);
        assert_eq!(mirrored.get(), Ok(3));
    }

    #[test]
    fn with_sees_the_value_it_read() {
        let rt = Runtime::new();
        let input = Cell::new(&rt, 1);
        let input_clone = input.clone();
        let doubled = Derived::new(&rt, move || Ok(input_clone.get() * 2));

        let doubled_clone = doubled.clone();
        let _watch = crate::reactive::Effect::new(&rt, move || {
            doubled_clone.get()?;
            Ok(None)
        })
        .unwrap();

        // The write re-evaluates `doubled` through the effect while `with`
        // is still running.
        let seen = doubled.with(|value| {
            input.set(5);
            *value
        });

        assert_eq!(seen, Ok(2));
        assert_eq!(doubled.get(), Ok(10));
    }

    #[test]
    fn failed_evaluation_keeps_previous_state() {
        let rt = Runtime::new();
        let input = Cell::new(&rt, "1".to_string());
        let input_clone = input.clone();
        let parsed = Derived::new(&rt, move || {
            input_clone
                .get()
                .parse::<i64>()
                .map_err(ReactiveError::evaluation)
        });

        assert_eq!(parsed.get(), Ok(1));

        input.set("x".to_string());
        assert!(matches!(parsed.get(), Err(ReactiveError::Evaluation { .. })));
        assert_eq!(parsed.state(), DirtyState::MaybeDirty);
        assert_eq!(parsed.dependency_count(), 1);

        input.set("7".to_string());
        assert_eq!(parsed.get(), Ok(7));
    }

    #[test]
    fn outer_readers_record_the_derived_node() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, 1);
        let a_clone = a.clone();
        let inner = Derived::new(&rt, move || Ok(a_clone.get() + 1));
        let inner_clone = inner.clone();
        let outer = Derived::new(&rt, move || inner_clone.get().map(|v| v * 10));

        assert_eq!(outer.get(), Ok(20));
        assert_eq!(outer.dependency_count(), 1);
        assert_eq!(inner.dependent_count(), 1);
    }

    #[test]
    fn peek_does_not_track_but_refreshes() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, 1);
        let a_clone = a.clone();
        let plus_one = Derived::new(&rt, move || Ok(a_clone.get() + 1));

        let (deps, value) = rt.capture(|| plus_one.peek());
        assert!(deps.is_empty());
        assert_eq!(value, Ok(2));
    }

    #[test]
    fn reading_after_runtime_drop_fails() {
        let rt = Runtime::new();
        let constant = Derived::new(&rt, || Ok(1));
        drop(rt);

        assert_eq!(constant.get(), Err(ReactiveError::RuntimeDropped));
    }
}
