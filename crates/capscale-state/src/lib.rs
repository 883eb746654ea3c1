//! capscale-state — the authoritative object store for capscale.
//!
//! Backed by [redb](https://docs.rs/redb), holds the four object kinds the
//! autoscaler provider reasons about: Nodes, Machines, MachineSets and
//! MachineDeployments.
//!
//! # Architecture
//!
//! Every object is JSON-serialized into a per-kind redb table keyed by
//! `{namespace}/{name}` (or `{name}` for cluster-scoped Nodes). Each write
//! bumps the object's `resource_version`; `update` rejects writes carrying a
//! stale version with [`StateError::Conflict`], which gives callers
//! optimistic concurrency without locks.
//!
//! Committed writes are published on a broadcast channel as [`WatchEvent`]s
//! so that caches can follow the store without polling.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{Snapshot, StateStore};
pub use types::*;
