//! Subscriptions and disposers.
//!
//! `subscribe` is the change-listener form of an effect: the listener sees
//! the new and previous value of a single node, and only when the node's
//! equality predicate says they differ.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::effect::Effect;
use super::source::Source;
use crate::error::{ReactiveError, Result};

/// Call `listener(&new, &previous)` after every transaction in which the
/// source's value changed.
///
/// The listener is not called for the initial value, and runs untracked:
/// reads inside it do not subscribe it to anything.
pub fn subscribe<T, F>(source: impl Into<Source<T>>, mut listener: F) -> Result<Effect>
where
    T: Clone + 'static,
    F: FnMut(&T, &T) + 'static,
{
    let source = source.into();
    let runtime = source.runtime().ok_or(ReactiveError::RuntimeDropped)?;
    let equals = source.equality();
    let mut previous: Option<T> = None;

    Effect::new(&runtime, move || {
        let current = source.read()?;
        if let Some(previous) = previous.replace(current.clone()) {
            if !equals(&current, &previous) {
                source.untracked(|| listener(&current, &previous));
            }
        }
        Ok(None)
    })
}

type DisposeFn = Box<dyn FnOnce()>;

/// Idempotent cancellation handle.
///
/// Clones share the same action; whichever clone disposes first runs it.
#[derive(Clone, Default)]
pub struct Disposer {
    action: Rc<RefCell<Option<DisposeFn>>>,
}

impl Disposer {
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        let action: DisposeFn = Box::new(action);
        Self {
            action: Rc::new(RefCell::new(Some(action))),
        }
    }

    /// Run the action if it has not run yet.
    pub fn dispose(&self) {
        let action = self.action.borrow_mut().take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.action.borrow().is_none()
    }
}

impl From<Effect> for Disposer {
    fn from(effect: Effect) -> Self {
        Disposer::new(move || effect.dispose())
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
