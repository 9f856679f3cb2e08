//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency is notified, the effect is queued. It runs once
//!    the outermost transaction closes, and only if a dependency actually
//!    changed.
//!
//! 3. Each run records a fresh dependency set, so conditional reads are
//!    followed.
//!
//! # Differences from Derived
//!
//! - Derived nodes return a value; effects do not.
//! - Derived nodes are lazy (compute on access); effects are eager (run when
//!   deps change).
//! - Derived nodes cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Effects can optionally return a cleanup function. This function is called
//! before the effect re-runs and when the effect is disposed. This is useful
//! for releasing resources like listeners or per-item state.
//!
//! # Lifetime
//!
//! The runtime keeps an effect alive until it is disposed. Dropping the
//! handle does not stop it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Reactive, Runtime, WeakRuntime};
use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId};

/// Function returned by an effect run, called before the next run and on
/// disposal.
pub type Cleanup = Box<dyn FnOnce()>;

type EffectFn = Box<dyn FnMut() -> Result<Option<Cleanup>>>;

struct EffectInner {
    id: NodeId,
    run: RefCell<EffectFn>,
    cleanup: RefCell<Option<Cleanup>>,
    runtime: WeakRuntime,
    disposed: std::cell::Cell<bool>,
    run_count: std::cell::Cell<usize>,
}

impl Reactive for EffectInner {
    fn run(&self, runtime: &Runtime) -> Result<bool> {
        if self.disposed.get() {
            return Ok(false);
        }

        let previous = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = previous {
            runtime.untracked(cleanup);
        }

        let result = {
            let mut run = self.run.try_borrow_mut().map_err(|_| ReactiveError::Cycle {
                node: runtime.display_name(self.id),
            })?;
            self.run_count.set(self.run_count.get() + 1);
            run()
        };

        if let Some(cleanup) = result? {
            if self.disposed.get() {
                // Disposed during its own run.
                runtime.untracked(cleanup);
            } else {
                *self.cleanup.borrow_mut() = Some(cleanup);
            }
        }

        Ok(true)
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```
/// use glint_core::{Cell, Effect, Runtime};
///
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 0);
///
/// let effect = Effect::new(&rt, {
///     let count = count.clone();
///     move || {
///         println!("Count is: {}", count.get());
///         Ok(None)
///     }
/// })
/// .unwrap();
///
/// count.set(5); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create a new effect and run it immediately.
    ///
    /// If the first run fails, the effect is disposed and the error
    /// returned.
    pub fn new<F>(runtime: &Runtime, run: F) -> Result<Self>
    where
        F: FnMut() -> Result<Option<Cleanup>> + 'static,
    {
        let node = Node::effect();
        let id = node.id();
        let run: EffectFn = Box::new(run);

        let inner = Rc::new(EffectInner {
            id,
            run: RefCell::new(run),
            cleanup: RefCell::new(None),
            runtime: runtime.downgrade(),
            disposed: std::cell::Cell::new(false),
            run_count: std::cell::Cell::new(0),
        });

        let reactive: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        runtime.register(node, Some(reactive));
        runtime.retain(id, inner.clone());

        let effect = Self { inner };

        if let Err(error) = runtime.run_effect(id) {
            effect.dispose();
            return Err(error);
        }

        // The first run may have written to something it read.
        runtime.flush_if_idle();

        Ok(effect)
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Stop the effect and run its last cleanup.
    ///
    /// Calling this more than once is a no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }

        let cleanup = self.inner.cleanup.borrow_mut().take();
        match self.inner.runtime.upgrade() {
            Some(runtime) => {
                runtime.unregister(self.inner.id);
                if let Some(cleanup) = cleanup {
                    runtime.untracked(cleanup);
                }
            }
            None => {
                if let Some(cleanup) = cleanup {
                    cleanup();
                }
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of nodes read during the last successful run.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map(|runtime| runtime.dependency_count(self.inner.id))
            .unwrap_or(0)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
