//! Server side of state replication.
//!
//! The server watches a named set of selectors. Every transaction that
//! changes one of them marks the server as changed; on the next diff cycle
//! the difference between the last sent state and the current one goes out
//! to every connected callback as patch payloads.
//!
//! # Cadence
//!
//! The host drives the server with [`ServerSyncer::tick`], typically once
//! per frame. With `interval == 0` each tick that follows a change diffs;
//! with a positive interval, diffs are spaced at least that many seconds
//! apart; with a negative interval only [`ServerSyncer::flush`] diffs.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;

use super::options::ServerOptions;
use super::patch::{diff, ListEncoding, State};
use super::payload::SyncPayload;
use super::value::Value;
use crate::error::{ReactiveError, Result, SyncError};
use crate::reactive::{Derived, Disposer, Effect, Runtime, Source};

/// Who a dispatch is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<P> {
    /// Every hydrated peer.
    All,
    /// A single peer, e.g. one that just joined.
    Peer(P),
}

type CallbackFn<P> = Box<dyn FnMut(&Target<P>, &[SyncPayload])>;
type Callback<P> = Rc<RefCell<CallbackFn<P>>>;

struct ServerInner<P: 'static> {
    runtime: Runtime,
    selectors: IndexMap<String, Source<Value>>,
    options: ServerOptions,
    encoding: ListEncoding,

    /// Last state sent to peers.
    snapshot: RefCell<State>,

    /// State at the end of the latest transaction that changed a selector.
    latest: RefCell<Option<State>>,

    /// States recorded since the last diff, oldest first.
    history: RefCell<Vec<State>>,

    changed: std::cell::Cell<bool>,
    elapsed: std::cell::Cell<f64>,

    callbacks: RefCell<IndexMap<u64, Callback<P>>>,
    next_callback: std::cell::Cell<u64>,
    watcher: RefCell<Option<Effect>>,
}

impl<P: 'static> ServerInner<P> {
    fn read_state(&self) -> Result<State> {
        self.selectors
            .iter()
            .map(|(name, selector)| Ok((name.clone(), selector.read()?)))
            .collect()
    }

    /// Called by the watcher after every transaction that changed a
    /// selector.
    fn record(&self, state: State, initial: bool) {
        if self.options.auto_serialize {
            for (name, value) in &state {
                if let Err(error) = value.validate(name) {
                    tracing::warn!(selector = %name, %error, "value will not survive the wire");
                }
            }
        }

        if initial {
            *self.snapshot.borrow_mut() = state.clone();
            self.history.borrow_mut().clear();
            self.changed.set(false);
        } else {
            if self.options.preserve_history {
                self.history.borrow_mut().push(state.clone());
            }
            self.changed.set(true);
        }
        *self.latest.borrow_mut() = Some(state);
    }

    fn dispatch(&self, target: &Target<P>, payloads: &[SyncPayload]) {
        let callbacks: Vec<(u64, Callback<P>)> = self
            .callbacks
            .borrow()
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect();

        tracing::debug!(
            payloads = payloads.len(),
            callbacks = callbacks.len(),
            "dispatching sync payloads"
        );

        for (id, callback) in callbacks {
            // Disconnected by an earlier callback.
            if !self.callbacks.borrow().contains_key(&id) {
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut callback) => callback(target, payloads),
                Err(_) => tracing::warn!("sync callback re-entered; skipping nested dispatch"),
            }
        }
    }

    fn disconnect(&self, id: u64) {
        let removed = self.callbacks.borrow_mut().shift_remove(&id);
        drop(removed);

        if self.callbacks.borrow().is_empty() {
            let watcher = self.watcher.borrow_mut().take();
            if let Some(watcher) = watcher {
                watcher.dispose();
            }
            self.history.borrow_mut().clear();
            self.latest.borrow_mut().take();
            self.changed.set(false);
        }
    }
}

impl<P: 'static> Drop for ServerInner<P> {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.dispose();
        }
    }
}

/// Broadcasts state changes to connected peers.
///
/// `P` identifies a peer; it is only passed through to callbacks.
pub struct ServerSyncer<P: 'static> {
    inner: Rc<ServerInner<P>>,
}

impl<P: 'static> ServerSyncer<P> {
    /// Create a server for the given selectors.
    ///
    /// Nothing is watched until the first callback connects.
    pub fn new(
        runtime: &Runtime,
        selectors: impl IntoIterator<Item = (impl Into<String>, Source<Value>)>,
        options: ServerOptions,
    ) -> Self {
        Self {
            inner: Rc::new(ServerInner {
                runtime: runtime.clone(),
                selectors: selectors
                    .into_iter()
                    .map(|(name, selector)| (name.into(), selector))
                    .collect(),
                encoding: options.list_encoding(),
                options,
                snapshot: RefCell::new(State::new()),
                latest: RefCell::new(None),
                history: RefCell::new(Vec::new()),
                changed: std::cell::Cell::new(false),
                elapsed: std::cell::Cell::new(0.0),
                callbacks: RefCell::new(IndexMap::new()),
                next_callback: std::cell::Cell::new(0),
                watcher: RefCell::new(None),
            }),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Register a callback for outgoing payloads.
    ///
    /// The first connection starts watching the selectors and takes the
    /// current state as the baseline for later patches. The returned
    /// disposer disconnects the callback; when the last one disconnects,
    /// watching stops.
    pub fn connect<F>(&self, callback: F) -> Result<Disposer>
    where
        F: FnMut(&Target<P>, &[SyncPayload]) + 'static,
    {
        if self.inner.watcher.borrow().is_none() {
            self.start_watcher()?;
        }

        let id = self.inner.next_callback.get();
        self.inner.next_callback.set(id + 1);
        let callback: CallbackFn<P> = Box::new(callback);
        self.inner
            .callbacks
            .borrow_mut()
            .insert(id, Rc::new(RefCell::new(callback)));

        let weak = Rc::downgrade(&self.inner);
        Ok(Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.disconnect(id);
            }
        }))
    }

    fn start_watcher(&self) -> Result<()> {
        let weak: Weak<ServerInner<P>> = Rc::downgrade(&self.inner);
        let mut initial = true;

        let watcher = Effect::new(&self.inner.runtime, move || {
            let Some(inner) = weak.upgrade() else {
                return Ok(None);
            };
            let state = inner.read_state()?;
            inner.record(state, initial);
            initial = false;
            Ok(None)
        })?;

        *self.inner.watcher.borrow_mut() = Some(watcher);
        Ok(())
    }

    /// Advance the host clock by `delta` and diff if the cadence allows.
    ///
    /// Returns whether payloads were sent.
    pub fn tick(&self, delta: Duration) -> bool {
        let interval = self.inner.options.interval;
        if interval < 0.0 {
            return false;
        }
        if interval == 0.0 {
            return self.inner.changed.get() && self.flush();
        }

        let elapsed = self.inner.elapsed.get() + delta.as_secs_f64();
        if elapsed >= interval && self.inner.changed.get() {
            self.inner.elapsed.set(0.0);
            self.flush()
        } else {
            self.inner.elapsed.set(elapsed);
            false
        }
    }

    /// Diff now, regardless of the cadence.
    ///
    /// Returns whether payloads were sent.
    pub fn flush(&self) -> bool {
        if !self.inner.changed.replace(false) {
            return false;
        }

        let encoding = self.inner.encoding;
        let mut payloads = Vec::new();
        {
            let mut snapshot = self.inner.snapshot.borrow_mut();

            if self.inner.options.preserve_history {
                let states = std::mem::take(&mut *self.inner.history.borrow_mut());
                for state in states {
                    let patch = diff(&snapshot, &state, encoding);
                    if !patch.is_empty() {
                        payloads.push(SyncPayload::Patch(patch));
                    }
                    *snapshot = state;
                }
            } else if let Some(state) = self.inner.latest.borrow().clone() {
                let patch = diff(&snapshot, &state, encoding);
                if !patch.is_empty() {
                    payloads.push(SyncPayload::Patch(patch));
                }
                *snapshot = state;
            }
        }

        if payloads.is_empty() {
            tracing::debug!("state changed back to the last sent state; nothing to send");
            return false;
        }

        self.inner.dispatch(&Target::All, &payloads);
        true
    }

    /// Send the full current state to a single peer.
    pub fn hydrate(&self, peer: P) -> Result<()> {
        let state = self.inner.runtime.untracked(|| self.inner.read_state())?;
        self.inner
            .dispatch(&Target::Peer(peer), &[SyncPayload::Init(state)]);
        Ok(())
    }

    /// Read every selector without tracking.
    pub fn current_state(&self) -> Result<State> {
        self.inner.runtime.untracked(|| self.inner.read_state())
    }

    /// Whether a selector changed since the last diff.
    pub fn has_changes(&self) -> bool {
        self.inner.changed.get()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }
}

impl<P: 'static> fmt::Debug for ServerSyncer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSyncer")
            .field("selectors", &self.inner.selectors.keys().collect::<Vec<_>>())
            .field("options", &self.inner.options)
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Turn any source whose values convert into [`Value`] into a selector.
pub fn selector<T>(source: impl Into<Source<T>>) -> Result<Source<Value>>
where
    T: Clone + Into<Value> + 'static,
{
    let source = source.into();
    let runtime = source.runtime().ok_or(ReactiveError::RuntimeDropped)?;

    Ok(Source::Derived(Derived::new(&runtime, move || {
        source.read().map(Into::into)
    })))
}

/// Turn any serializable source into a selector.
///
/// Serialization failures surface as evaluation errors when the selector is
/// read.
pub fn serde_selector<T>(source: impl Into<Source<T>>) -> Result<Source<Value>>
where
    T: Serialize + 'static,
{
    let source = source.into();
    let runtime = source.runtime().ok_or(ReactiveError::RuntimeDropped)?;

    Ok(Source::Derived(Derived::new(&runtime, move || {
        source
            .with(Value::from_serde)?
            .map_err(|error: SyncError| ReactiveError::evaluation(error))
    })))
}
