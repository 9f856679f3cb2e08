//! Structural diffing and patch application.
//!
//! A [`Patch`] describes how to turn one [`Value`] into another. Maps, sets
//! and lists are diffed member by member so a patch only carries what
//! changed; everything else is replaced wholesale. Removed members are
//! marked with [`Patch::Remove`], the tombstone.

use std::fmt;

use indexmap::IndexMap;

use super::value::Value;

/// State of every selector, by name.
pub type State = IndexMap<String, Value>;

/// Patch for a whole [`State`].
pub type StatePatch = IndexMap<String, Patch>;

/// A change to a single value.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// The member was removed.
    Remove,
    /// The value is replaced as a whole.
    Replace(Value),
    /// Per-member changes to a map, a set (element to `true` or `Remove`)
    /// or an index-keyed list.
    Merge(IndexMap<String, Patch>),
    /// Per-position changes to a list. `None` leaves the element alone.
    Sparse(Vec<Option<Patch>>),
}

impl Patch {
    /// Whether this is the removal tombstone.
    pub fn is_none(&self) -> bool {
        matches!(self, Patch::Remove)
    }

    fn is_memberwise(&self) -> bool {
        matches!(self, Patch::Merge(_) | Patch::Sparse(_))
    }
}

/// How list changes are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListEncoding {
    /// `{"0": .., "3": ..}`. Survives any codec.
    #[default]
    Indexed,
    /// `[.., null, ..]`. Compact, but a hole cannot be told apart from an
    /// element set to null.
    Sparse,
}

/// What to do when a patch expects a container that is not there.
///
/// A map or list that appears under a new key is diffed as a whole
/// replacement, but once it has been through a codec it decodes as a
/// member-wise merge into a missing path. Under `Create` both cases are
/// built silently, since they cannot be told apart. Under `Ignore` both are
/// skipped and reported as [`PatchIssue::MissingPath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissingPathPolicy {
    /// Replace the mismatching value with the container the patch needs.
    #[default]
    Create,
    /// Leave the value alone and skip that part of the patch. Missing or
    /// null containers are not built.
    Ignore,
}

/// A sign that the receiving side has drifted from the sender.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchIssue {
    #[error("patch names unknown selector {name:?}")]
    UnknownSelector { name: String },

    #[error("cannot merge into {found} at {path}")]
    TypeMismatch { path: String, found: &'static str },

    #[error("list index {index} at {path} skips past length {len}")]
    IndexGap {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("key {key:?} at {path} is not a list index")]
    NotAnIndex { path: String, key: String },

    #[error("nothing to merge into at {path}")]
    MissingPath { path: String },
}

/// Compute the patch that turns `prev` into `next`.
///
/// The result is empty when both states are equal.
pub fn diff(prev: &State, next: &State, encoding: ListEncoding) -> StatePatch {
    diff_entries(prev, next, encoding)
}

/// Compute the patch that turns one value into another, or `None` if they
/// are equal.
pub fn diff_value(prev: &Value, next: &Value, encoding: ListEncoding) -> Option<Patch> {
    if prev == next {
        return None;
    }

    let patch = match (prev, next) {
        (Value::Map(a), Value::Map(b)) => Patch::Merge(diff_entries(a, b, encoding)),
        (Value::Set(a), Value::Set(b)) => {
            let mut entries = IndexMap::new();
            for added in b.difference(a) {
                entries.insert(added.clone(), Patch::Replace(Value::Bool(true)));
            }
            for removed in a.difference(b) {
                entries.insert(removed.clone(), Patch::Remove);
            }
            Patch::Merge(entries)
        }
        (Value::List(a), Value::List(b)) => diff_lists(a, b, encoding),
        _ => Patch::Replace(next.clone()),
    };

    Some(patch)
}

fn diff_entries(
    prev: &IndexMap<String, Value>,
    next: &IndexMap<String, Value>,
    encoding: ListEncoding,
) -> IndexMap<String, Patch> {
    let mut entries = IndexMap::new();

    for (key, next_value) in next {
        let patch = match prev.get(key) {
            Some(prev_value) => diff_value(prev_value, next_value, encoding),
            None => Some(Patch::Replace(next_value.clone())),
        };
        if let Some(patch) = patch {
            entries.insert(key.clone(), patch);
        }
    }

    for key in prev.keys() {
        if !next.contains_key(key) {
            entries.insert(key.clone(), Patch::Remove);
        }
    }

    entries
}

fn diff_lists(prev: &[Value], next: &[Value], encoding: ListEncoding) -> Patch {
    let changes = (0..prev.len().max(next.len())).map(|i| match (prev.get(i), next.get(i)) {
        (Some(a), Some(b)) => diff_value(a, b, encoding),
        (None, Some(b)) => Some(Patch::Replace(b.clone())),
        (Some(_), None) => Some(Patch::Remove),
        (None, None) => None,
    });

    match encoding {
        ListEncoding::Indexed => Patch::Merge(
            changes
                .enumerate()
                .filter_map(|(i, patch)| patch.map(|patch| (i.to_string(), patch)))
                .collect(),
        ),
        ListEncoding::Sparse => {
            let mut slots: Vec<Option<Patch>> = changes.collect();
            while matches!(slots.last(), Some(None)) {
                slots.pop();
            }
            Patch::Sparse(slots)
        }
    }
}

/// Apply a state patch in place and return the issues found.
///
/// Top-level tombstones remove the selector from the state.
pub fn apply(state: &mut State, patch: &StatePatch, policy: MissingPathPolicy) -> Vec<PatchIssue> {
    let mut applier = Applier::new(policy);
    for (name, change) in patch {
        match change {
            Patch::Remove => {
                state.shift_remove(name);
            }
            change => {
                if !state.contains_key(name) && applier.skip_missing(change, name) {
                    continue;
                }
                let slot = state.entry(name.clone()).or_insert(Value::Null);
                applier.apply(slot, change, name);
            }
        }
    }
    applier.issues
}

/// Apply a patch to a single value and return the issues found.
///
/// `path` names the value in issue reports. A tombstone resets the value to
/// null.
pub fn apply_value(
    target: &mut Value,
    patch: &Patch,
    path: &str,
    policy: MissingPathPolicy,
) -> Vec<PatchIssue> {
    let mut applier = Applier::new(policy);
    applier.apply(target, patch, path);
    applier.issues
}

struct Applier {
    policy: MissingPathPolicy,
    issues: Vec<PatchIssue>,
}

impl Applier {
    fn new(policy: MissingPathPolicy) -> Self {
        Self {
            policy,
            issues: Vec::new(),
        }
    }

    fn apply(&mut self, target: &mut Value, patch: &Patch, path: &str) {
        match patch {
            Patch::Remove => *target = Value::Null,
            Patch::Replace(value) => *target = value.clone(),
            _ if target.is_null() && self.skip_missing(patch, path) => {}
            Patch::Merge(entries) => self.merge(target, entries, path),
            Patch::Sparse(slots) => self.sparse(target, slots, path),
        }
    }

    /// Whether a member-wise `patch` into a missing or null value at `path`
    /// is skipped under the policy. Skips are reported.
    fn skip_missing(&mut self, patch: &Patch, path: &str) -> bool {
        if !patch.is_memberwise() || self.policy == MissingPathPolicy::Create {
            return false;
        }
        self.issues.push(PatchIssue::MissingPath {
            path: path.to_string(),
        });
        true
    }

    /// Decide whether `target` can take a member-wise patch. Null targets
    /// become `empty`; the missing-path policy has already been applied.
    fn prepare(&mut self, target: &mut Value, path: &str, empty: fn() -> Value) -> bool {
        if target.is_null() {
            *target = empty();
            return true;
        }

        self.issues.push(PatchIssue::TypeMismatch {
            path: path.to_string(),
            found: target.type_name(),
        });
        match self.policy {
            MissingPathPolicy::Create => {
                *target = empty();
                true
            }
            MissingPathPolicy::Ignore => false,
        }
    }

    fn merge(&mut self, target: &mut Value, entries: &IndexMap<String, Patch>, path: &str) {
        match target {
            Value::Map(map) => {
                for (key, change) in entries {
                    let child_path = format!("{path}/{key}");
                    match change {
                        Patch::Remove => {
                            map.shift_remove(key);
                        }
                        change => {
                            if !map.contains_key(key) && self.skip_missing(change, &child_path) {
                                continue;
                            }
                            let slot = map.entry(key.clone()).or_insert(Value::Null);
                            self.apply(slot, change, &child_path);
                        }
                    }
                }
            }
            Value::Set(set) => {
                for (key, change) in entries {
                    if change.is_none() {
                        set.shift_remove(key);
                    } else {
                        set.insert(key.clone());
                    }
                }
            }
            Value::List(items) => {
                let mut indexed = Vec::with_capacity(entries.len());
                for (key, change) in entries {
                    match key.parse::<usize>() {
                        Ok(index) => indexed.push((index, change)),
                        Err(_) => self.issues.push(PatchIssue::NotAnIndex {
                            path: path.to_string(),
                            key: key.clone(),
                        }),
                    }
                }
                self.positions(items, indexed, path);
            }
            _ => {
                if self.prepare(target, path, || Value::Map(IndexMap::new())) {
                    self.merge(target, entries, path);
                }
            }
        }
    }

    fn sparse(&mut self, target: &mut Value, slots: &[Option<Patch>], path: &str) {
        match target {
            Value::List(items) => {
                let indexed = slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| slot.as_ref().map(|change| (i, change)))
                    .collect();
                self.positions(items, indexed, path);
            }
            _ => {
                if self.prepare(target, path, || Value::List(Vec::new())) {
                    self.sparse(target, slots, path);
                }
            }
        }
    }

    /// Apply index-addressed changes: writes in ascending order, then
    /// removals from the back so earlier indices stay valid.
    fn positions(&mut self, items: &mut Vec<Value>, mut changes: Vec<(usize, &Patch)>, path: &str) {
        changes.sort_by_key(|(index, _)| *index);

        for (index, change) in changes.iter().filter(|(_, change)| !change.is_none()) {
            let child_path = format!("{path}/{index}");
            if *index >= items.len() && self.skip_missing(change, &child_path) {
                continue;
            }
            if *index > items.len() {
                self.issues.push(PatchIssue::IndexGap {
                    path: path.to_string(),
                    index: *index,
                    len: items.len(),
                });
                items.resize(*index, Value::Null);
            }
            if *index == items.len() {
                items.push(Value::Null);
            }
            self.apply(&mut items[*index], change, &child_path);
        }

        for (index, _) in changes.iter().rev().filter(|(_, change)| change.is_none()) {
            if *index < items.len() {
                items.remove(*index);
            }
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Remove => f.write_str("remove"),
            Patch::Replace(value) => write!(f, "replace({})", value.type_name()),
            Patch::Merge(entries) => write!(f, "merge({} entries)", entries.len()),
            Patch::Sparse(slots) => write!(f, "sparse({} slots)", slots.len()),
        }
    }
}
