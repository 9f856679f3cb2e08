//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, derived values
//! and effects. These primitives form the foundation of Glint's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell's value is read
//! within a tracking context (such as a derived node or effect), the read is
//! recorded as a dependency. When the cell's value changes, every dependent
//! is notified.
//!
//! ## Derived
//!
//! A Derived node caches a value computed from other nodes. It re-evaluates
//! only when one of its dependencies changed, and only when it is read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects synchronize reactive state with external
//! systems, such as a network peer or a log.
//!
//! # Implementation Notes
//!
//! Every node belongs to an explicit [`Runtime`]. The runtime keeps a stack
//! of capture frames; when a node is read, the read is recorded in the
//! innermost frame. There is no global or thread-local state, so several
//! runtimes can live side by side.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod cell;
mod context;
mod derived;
mod effect;
mod observe;
mod runtime;
mod source;
mod subscriber;

pub use cell::{Cell, Equality};
pub use context::{ContextGuard, FrameKind, ReactiveContext};
pub use derived::Derived;
pub use effect::{Cleanup, Effect};
pub use observe::{mapped, mapped_list, observe, observe_with, Keyed, ObservePolicy};
pub use runtime::Runtime;
pub use source::Source;
pub use subscriber::{subscribe, Disposer};
