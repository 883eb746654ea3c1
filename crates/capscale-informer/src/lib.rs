//! capscale-informer — local mirror of the object store.
//!
//! Keeps four in-memory collections (Nodes, Machines, MachineSets,
//! MachineDeployments) current by consuming the store's watch stream. All
//! topology resolution reads from this cache and never touches the store.
//!
//! # Consistency
//!
//! ```text
//! start():  subscribe → list all kinds → mark synced → spawn event loop
//! event:    apply under one write lock (older resource versions ignored)
//! lagged:   relist every kind in one read transaction, swap all four together
//! ```
//!
//! `Informer::start` only hands out an [`ObjectCache`] after the initial
//! list has been loaded, and `ObjectCache` has no public empty constructor,
//! so no caller outside this crate can observe an unsynced cache.

pub mod cache;
pub mod informer;

pub use cache::{CacheCounts, IndexFn, ObjectCache, TypedStore};
pub use informer::{Informer, InformerError, InformerResult};
