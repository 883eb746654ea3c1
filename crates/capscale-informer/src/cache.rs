//! Object cache — four internally synchronized keyed collections.
//!
//! Each [`TypedStore`] is an `Arc<RwLock<..>>` over a `HashMap<key, Arc<T>>`
//! plus an optional secondary index. Readers get cloned `Arc` snapshots, so a
//! returned object never changes underneath the caller even if the watch feed
//! replaces it a moment later.
//!
//! A relist takes the write locks of all four collections, always in the
//! order nodes, machines, machine sets, machine deployments, and swaps them
//! together. Anything that needs more than one lock takes them in that order.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use capscale_state::{
    Machine, MachineDeployment, MachineSet, Node, Object, Resource, StateResult, StateStore,
    WatchEvent,
};

/// Extracts the secondary index value of an object, if it has one.
pub type IndexFn<T> = fn(&T) -> Option<&str>;

struct Entries<T> {
    items: HashMap<String, Arc<T>>,
    /// index value → keys of the objects carrying it
    index: HashMap<String, BTreeSet<String>>,
}

impl<T> Entries<T> {
    fn empty() -> Self {
        Self {
            items: HashMap::new(),
            index: HashMap::new(),
        }
    }

    fn put(&mut self, key: String, object: Arc<T>, index_fn: Option<IndexFn<T>>) {
        self.take(&key, index_fn);
        if let Some(value) = index_fn.and_then(|f| f(&object)) {
            self.index
                .entry(value.to_string())
                .or_default()
                .insert(key.clone());
        }
        self.items.insert(key, object);
    }

    fn take(&mut self, key: &str, index_fn: Option<IndexFn<T>>) -> Option<Arc<T>> {
        let old = self.items.remove(key)?;
        if let Some(value) = index_fn.and_then(|f| f(&old))
            && let Some(keys) = self.index.get_mut(value)
        {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(value);
            }
        }
        Some(old)
    }
}

/// Keyed collection of one object kind.
pub struct TypedStore<T> {
    entries: Arc<RwLock<Entries<T>>>,
    index_fn: Option<IndexFn<T>>,
}

impl<T> Clone for TypedStore<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            index_fn: self.index_fn,
        }
    }
}

impl<T> Default for TypedStore<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::empty())),
            index_fn: None,
        }
    }
}

impl<T: Resource> TypedStore<T> {
    /// An empty collection that also indexes objects by `index_fn`.
    pub fn with_index(index_fn: IndexFn<T>) -> Self {
        Self {
            index_fn: Some(index_fn),
            ..Self::default()
        }
    }

    /// Look up an object by `namespace/name` (or `name` for Nodes).
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let entries = self.entries.read().expect("cache lock");
        entries.items.get(key).cloned()
    }

    /// Objects whose index value is `value`, ordered by key.
    ///
    /// Always empty for a collection built without an index.
    pub fn get_by_index(&self, value: &str) -> Vec<Arc<T>> {
        let entries = self.entries.read().expect("cache lock");
        let Some(keys) = entries.index.get(value) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| entries.items.get(key).cloned())
            .collect()
    }

    /// Snapshot of every cached object.
    pub fn list(&self) -> Vec<Arc<T>> {
        let entries = self.entries.read().expect("cache lock");
        entries.items.values().cloned().collect()
    }

    /// Snapshot of cached objects matching `predicate`.
    pub fn list_filtered<F>(&self, predicate: F) -> Vec<Arc<T>>
    where
        F: Fn(&T) -> bool,
    {
        let entries = self.entries.read().expect("cache lock");
        entries
            .items
            .values()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    }

    /// Snapshot of cached objects in one namespace.
    pub fn list_in_namespace(&self, namespace: &str) -> Vec<Arc<T>> {
        self.list_filtered(|item| item.metadata().namespace == namespace)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace an object unconditionally.
    pub fn insert(&self, object: T) {
        let key = object.key();
        let mut entries = self.entries.write().expect("cache lock");
        entries.put(key, Arc::new(object), self.index_fn);
    }

    /// Insert or replace an object unless the cached copy is newer.
    ///
    /// Returns false when the object was ignored as stale.
    pub fn apply(&self, object: T) -> bool {
        let key = object.key();
        let mut entries = self.entries.write().expect("cache lock");
        if let Some(existing) = entries.items.get(&key)
            && existing.metadata().resource_version > object.metadata().resource_version
        {
            trace!(kind = %T::KIND, %key, "ignoring stale object");
            return false;
        }
        entries.put(key, Arc::new(object), self.index_fn);
        true
    }

    /// Remove an object. Returns true if it was cached.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().expect("cache lock");
        entries.take(key, self.index_fn).is_some()
    }

    /// Atomically swap the whole collection.
    pub fn replace(&self, objects: Vec<T>) {
        let fresh = self.build(objects);
        *self.entries.write().expect("cache lock") = fresh;
    }

    fn build(&self, objects: Vec<T>) -> Entries<T> {
        let mut fresh = Entries::empty();
        for object in objects {
            fresh.put(object.key(), Arc::new(object), self.index_fn);
        }
        fresh
    }
}

fn node_provider_id(node: &Node) -> Option<&str> {
    Some(node.spec.provider_id.as_str()).filter(|id| !id.is_empty())
}

/// Object counts read under all four locks at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCounts {
    pub nodes: usize,
    pub machines: usize,
    pub machine_sets: usize,
    pub machine_deployments: usize,
}

/// The four watched collections plus the initial-sync flag.
///
/// Cheap to clone; every clone shares the same underlying maps. Nodes are
/// indexed by provider id.
///
/// Outside this crate a cache only comes from [`ObjectCache::from_store`] or
/// [`Informer::start`](crate::Informer::start), and both return it synced.
///
/// ```compile_fail
/// let cache = capscale_informer::ObjectCache::default();
/// ```
#[derive(Clone)]
pub struct ObjectCache {
    nodes: TypedStore<Node>,
    machines: TypedStore<Machine>,
    machine_sets: TypedStore<MachineSet>,
    machine_deployments: TypedStore<MachineDeployment>,
    synced: Arc<AtomicBool>,
}

impl ObjectCache {
    /// An empty cache that has not been synced yet.
    pub(crate) fn unsynced() -> Self {
        Self {
            nodes: TypedStore::with_index(node_provider_id),
            machines: TypedStore::default(),
            machine_sets: TypedStore::default(),
            machine_deployments: TypedStore::default(),
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build a synced cache from a one-shot list of the store.
    ///
    /// The result is a point-in-time snapshot; it does not follow later
    /// writes unless an [`Informer`](crate::Informer) feeds it.
    pub fn from_store(store: &StateStore) -> StateResult<Self> {
        let cache = Self::unsynced();
        cache.resync(store)?;
        Ok(cache)
    }

    pub fn nodes(&self) -> &TypedStore<Node> {
        &self.nodes
    }

    pub fn machines(&self) -> &TypedStore<Machine> {
        &self.machines
    }

    pub fn machine_sets(&self) -> &TypedStore<MachineSet> {
        &self.machine_sets
    }

    pub fn machine_deployments(&self) -> &TypedStore<MachineDeployment> {
        &self.machine_deployments
    }

    /// Whether the initial full list has completed.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Size of every collection, taken at a single point in time.
    pub fn counts(&self) -> CacheCounts {
        let nodes = self.nodes.entries.read().expect("cache lock");
        let machines = self.machines.entries.read().expect("cache lock");
        let machine_sets = self.machine_sets.entries.read().expect("cache lock");
        let machine_deployments = self.machine_deployments.entries.read().expect("cache lock");
        CacheCounts {
            nodes: nodes.items.len(),
            machines: machines.items.len(),
            machine_sets: machine_sets.items.len(),
            machine_deployments: machine_deployments.items.len(),
        }
    }

    /// Relist every kind from one store snapshot and swap all four
    /// collections in a single step.
    pub fn resync(&self, store: &StateStore) -> StateResult<()> {
        let snapshot = store.snapshot()?;
        debug!(
            nodes = snapshot.nodes.len(),
            machines = snapshot.machines.len(),
            machine_sets = snapshot.machine_sets.len(),
            machine_deployments = snapshot.machine_deployments.len(),
            "cache resynced"
        );

        let nodes = self.nodes.build(snapshot.nodes);
        let machines = self.machines.build(snapshot.machines);
        let machine_sets = self.machine_sets.build(snapshot.machine_sets);
        let machine_deployments = self.machine_deployments.build(snapshot.machine_deployments);

        let mut nodes_guard = self.nodes.entries.write().expect("cache lock");
        let mut machines_guard = self.machines.entries.write().expect("cache lock");
        let mut machine_sets_guard = self.machine_sets.entries.write().expect("cache lock");
        let mut machine_deployments_guard =
            self.machine_deployments.entries.write().expect("cache lock");
        *nodes_guard = nodes;
        *machines_guard = machines;
        *machine_sets_guard = machine_sets;
        *machine_deployments_guard = machine_deployments;
        self.synced.store(true, Ordering::Release);
        Ok(())
    }

    /// Apply one watch event to the matching collection.
    pub fn apply_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(object) | WatchEvent::Modified(object) => self.upsert(object),
            WatchEvent::Deleted(object) => self.delete(&object),
        }
    }

    fn upsert(&self, object: Object) {
        let key = object.metadata().key();
        let kind = object.kind();
        let applied = match object {
            Object::Node(o) => self.nodes.apply(o),
            Object::Machine(o) => self.machines.apply(o),
            Object::MachineSet(o) => self.machine_sets.apply(o),
            Object::MachineDeployment(o) => self.machine_deployments.apply(o),
        };
        trace!(%kind, %key, applied, "cache upsert");
    }

    fn delete(&self, object: &Object) {
        let key = object.metadata().key();
        let removed = match object {
            Object::Node(_) => self.nodes.remove(&key),
            Object::Machine(_) => self.machines.remove(&key),
            Object::MachineSet(_) => self.machine_sets.remove(&key),
            Object::MachineDeployment(_) => self.machine_deployments.remove(&key),
        };
        trace!(kind = %object.kind(), %key, removed, "cache delete");
    }
}
