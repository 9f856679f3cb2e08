//! Glint Core
//!
//! This crate provides a fine-grained reactive state graph and a layer that
//! replicates named pieces of that state from a server to its clients.
//! It implements:
//!
//! - Reactive primitives (cells, derived values, effects, subscriptions)
//! - Glitch-free, batched propagation with per-node equality
//! - Keyed collection observers and mapped collections
//! - Structural diffing and patching of serializable state
//! - Server and client syncers with JSON and MessagePack payloads
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives and the runtime that schedules them
//! - `graph`: Dependency graph bookkeeping and the update scheduler
//! - `sync`: Value model, diff/patch engine and the syncers
//! - `error`: Error types shared by the modules above
//!
//! Everything is single-threaded. A [`Runtime`] owns one graph; handles
//! created on different runtimes never interact.
//!
//! # Example
//!
//! ```rust
//! use glint_core::{Cell, Derived, Effect, Runtime};
//!
//! let rt = Runtime::new();
//!
//! // Create a cell
//! let count = Cell::new(&rt, 0);
//!
//! // Create a derived value
//! let doubled = Derived::new(&rt, {
//!     let count = count.clone();
//!     move || Ok(count.get() * 2)
//! });
//!
//! // Create an effect
//! let effect = Effect::new(&rt, {
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || {
//!         println!("Count: {}, Doubled: {}", count.get(), doubled.get()?);
//!         Ok(None)
//!     }
//! })
//! .unwrap();
//!
//! // Update the cell
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! assert_eq!(effect.run_count(), 2);
//! ```

pub mod error;
pub mod graph;
pub mod reactive;
pub mod sync;

pub use error::{ReactiveError, Result, SyncError};
pub use graph::{DirtyState, NodeId};
pub use reactive::{
    mapped, mapped_list, observe, observe_with, subscribe, Cell, Cleanup, Derived, Disposer,
    Effect, Keyed, ObservePolicy, Runtime, Source,
};
pub use sync::{ClientOptions, ClientSyncer, ServerOptions, ServerSyncer, SyncPayload, Value};
