//! State Replication
//!
//! This module keeps a client's copy of the state in step with a server's.
//!
//! # Overview
//!
//! - The server ([`ServerSyncer`]) watches named selectors. After state
//!   changes it diffs the last sent state against the current one and hands
//!   the resulting [`SyncPayload`]s to connected callbacks.
//! - The client ([`ClientSyncer`]) owns one cell per selector and applies
//!   payloads to them.
//!
//! How payloads travel between the two is up to the host; this module only
//! defines their shape ([`SyncPayload::to_json`], [`SyncPayload::to_msgpack`])
//! and when they are produced.
//!
//! # Design Decisions
//!
//! 1. Patches are structural: maps, sets and lists are diffed member by
//!    member; everything else is replaced.
//!
//! 2. Removal is an explicit tombstone, so "absent from the patch" always
//!    means "unchanged".
//!
//! 3. The server is the single source of truth. Clients never send patches
//!    back, and a client that drifts is reported, not reconciled.

mod client;
mod flatten;
mod options;
mod patch;
mod payload;
mod server;
mod value;

pub use client::ClientSyncer;
pub use flatten::{flatten, Nested, SEPARATOR};
pub use options::{ClientOptions, ServerOptions};
pub use patch::{
    apply, apply_value, diff, diff_value, ListEncoding, MissingPathPolicy, Patch, PatchIssue,
    State, StatePatch,
};
pub use payload::{SyncPayload, NONE_MARKER};
pub use server::{selector, serde_selector, ServerSyncer, Target};
pub use value::Value;
