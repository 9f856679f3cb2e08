//! Nested selector maps.
//!
//! Hosts often group selectors by feature. [`flatten`] turns such a tree
//! into the flat, slash-separated names the syncers work with:
//!
//! ```
//! use glint_core::sync::{flatten, Nested};
//!
//! let tree = Nested::group([
//!     ("player", Nested::group([("health", Nested::Leaf(100)), ("mana", Nested::Leaf(40))])),
//!     ("round", Nested::Leaf(3)),
//! ]);
//!
//! let flat = flatten(tree);
//! assert_eq!(flat.keys().collect::<Vec<_>>(), vec!["player/health", "player/mana", "round"]);
//! ```

use indexmap::IndexMap;

/// Separator between group and member names.
pub const SEPARATOR: char = '/';

/// A tree of named values.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Leaf(T),
    Group(IndexMap<String, Nested<T>>),
}

impl<T> Nested<T> {
    pub fn group(entries: impl IntoIterator<Item = (impl Into<String>, Nested<T>)>) -> Self {
        Nested::Group(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Flatten a tree into `group/member` names, depth first, in insertion
/// order. A bare leaf flattens to a single entry with an empty name.
pub fn flatten<T>(tree: Nested<T>) -> IndexMap<String, T> {
    let mut out = IndexMap::new();
    flatten_into(tree, String::new(), &mut out);
    out
}

fn flatten_into<T>(tree: Nested<T>, prefix: String, out: &mut IndexMap<String, T>) {
    match tree {
        Nested::Leaf(value) => {
            out.insert(prefix, value);
        }
        Nested::Group(entries) => {
            for (name, child) in entries {
                let path = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}{SEPARATOR}{name}")
                };
                flatten_into(child, path, out);
            }
        }
    }
}
