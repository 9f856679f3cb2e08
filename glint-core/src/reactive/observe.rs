//! Keyed observation of collections.
//!
//! `observe` starts a child lifecycle for every key that appears in a
//! collection and tears it down when the key disappears. `mapped` and
//! `mapped_list` derive a new collection entry by entry.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use super::derived::Derived;
use super::effect::{Cleanup, Effect};
use super::source::Source;
use super::subscriber::Disposer;
use crate::error::{ReactiveError, Result};
use crate::sync::Value;

/// A collection that can be viewed as ordered `(key, item)` entries.
pub trait Keyed {
    type Key: Clone + Eq + Hash;
    type Item: Clone + PartialEq;

    fn entries(&self) -> Vec<(Self::Key, Self::Item)>;
}

impl<T: Clone + PartialEq> Keyed for Vec<T> {
    type Key = usize;
    type Item = T;

    fn entries(&self) -> Vec<(usize, T)> {
        self.iter().cloned().enumerate().collect()
    }
}

impl<K: Clone + Eq + Hash, V: Clone + PartialEq> Keyed for IndexMap<K, V> {
    type Key = K;
    type Item = V;

    fn entries(&self) -> Vec<(K, V)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl<K: Clone + Eq + Hash, V: Clone + PartialEq> Keyed for HashMap<K, V> {
    type Key = K;
    type Item = V;

    fn entries(&self) -> Vec<(K, V)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl<K: Clone + Ord + Hash, V: Clone + PartialEq> Keyed for BTreeMap<K, V> {
    type Key = K;
    type Item = V;

    fn entries(&self) -> Vec<(K, V)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Lists are keyed by index, maps by key and sets by element. Scalars have
/// no entries.
impl Keyed for Value {
    type Key = String;
    type Item = Value;

    fn entries(&self) -> Vec<(String, Value)> {
        match self {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), item.clone()))
                .collect(),
            Value::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Value::Set(set) => set.iter().map(|k| (k.clone(), Value::Bool(true))).collect(),
            _ => Vec::new(),
        }
    }
}

/// When an existing key counts as "new".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservePolicy {
    /// Only key appearance and disappearance matter.
    #[default]
    ByKey,
    /// A key whose item changed is torn down and started again.
    ByKeyAndValue,
}

/// Call `factory(item, key)` for every key that appears in the collection
/// and the returned cleanup when it disappears.
///
/// The returned disposer stops observing and cleans up every live key.
pub fn observe<C, F>(source: impl Into<Source<C>>, factory: F) -> Result<Disposer>
where
    C: Keyed + 'static,
    F: FnMut(&C::Item, &C::Key) -> Option<Cleanup> + 'static,
{
    observe_with(source, ObservePolicy::default(), factory)
}

/// [`observe`] with an explicit key identity policy.
pub fn observe_with<C, F>(
    source: impl Into<Source<C>>,
    policy: ObservePolicy,
    mut factory: F,
) -> Result<Disposer>
where
    C: Keyed + 'static,
    F: FnMut(&C::Item, &C::Key) -> Option<Cleanup> + 'static,
{
    let source = source.into();
    let runtime = source.runtime().ok_or(ReactiveError::RuntimeDropped)?;

    type Live<K, I> = IndexMap<K, (I, Option<Cleanup>)>;
    let live: Rc<RefCell<Live<C::Key, C::Item>>> = Rc::new(RefCell::new(IndexMap::new()));

    let live_clone = live.clone();
    let effect = Effect::new(&runtime, move || {
        let next: IndexMap<C::Key, C::Item> = source.with(|c| c.entries())?.into_iter().collect();

        let removed: Vec<Option<Cleanup>> = {
            let mut live = live_clone.borrow_mut();
            let stale: Vec<C::Key> = live
                .iter()
                .filter(|(key, (item, _))| match next.get(*key) {
                    None => true,
                    Some(next_item) => policy == ObservePolicy::ByKeyAndValue && next_item != item,
                })
                .map(|(key, _)| key.clone())
                .collect();

            stale
                .iter()
                .filter_map(|key| live.shift_remove(key))
                .map(|(_, cleanup)| cleanup)
                .collect()
        };

        source.untracked(|| {
            for cleanup in removed.into_iter().flatten() {
                cleanup();
            }

            for (key, item) in next {
                let known = live_clone.borrow().contains_key(&key);
                if known {
                    if let Some(entry) = live_clone.borrow_mut().get_mut(&key) {
                        entry.0 = item;
                    }
                    continue;
                }
                let cleanup = factory(&item, &key);
                live_clone.borrow_mut().insert(key, (item, cleanup));
            }
        });

        Ok(None)
    })?;

    Ok(Disposer::new(move || {
        effect.dispose();
        let remaining = std::mem::take(&mut *live.borrow_mut());
        for (_, (_, cleanup)) in remaining {
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        }
    }))
}

/// Derive a map by transforming each entry of a keyed collection.
///
/// Entries for which `mapper` returns `None` are left out.
pub fn mapped<C, K, V, F>(source: impl Into<Source<C>>, mapper: F) -> Result<Derived<IndexMap<K, V>>>
where
    C: Keyed + 'static,
    K: Eq + Hash + 'static,
    V: PartialEq + 'static,
    F: Fn(&C::Item, &C::Key) -> Option<(K, V)> + 'static,
{
    let source = source.into();
    let runtime = source.runtime().ok_or(ReactiveError::RuntimeDropped)?;

    Ok(Derived::new(&runtime, move || {
        source.with(|collection| {
            collection
                .entries()
                .iter()
                .filter_map(|(key, item)| mapper(item, key))
                .collect()
        })
    }))
}

/// Derive a list by transforming each element of a list.
pub fn mapped_list<T, U, F>(source: impl Into<Source<Vec<T>>>, mapper: F) -> Result<Derived<Vec<U>>>
where
    T: 'static,
    U: PartialEq + 'static,
    F: Fn(&T, usize) -> U + 'static,
{
    let source = source.into();
    let runtime = source.runtime().ok_or(ReactiveError::RuntimeDropped)?;

    Ok(Derived::new(&runtime, move || {
        source.with(|items| {
            items
                .iter()
                .enumerate()
                .map(|(index, item)| mapper(item, index))
                .collect()
        })
    }))
}
