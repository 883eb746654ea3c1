//! StateStore — redb-backed object store for capscale.
//!
//! Provides typed get/list/create/update/delete over the four object kinds.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! Writes are versioned: `create` starts an object at version 1 and every
//! subsequent write bumps it. `update` only succeeds when the caller's copy
//! carries the stored version, so a get-modify-update cycle that races
//! another writer fails with [`StateError::Conflict`] instead of silently
//! overwriting it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Capacity of the watch broadcast channel.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Thread-safe object store backed by redb.
///
/// Writers hold `write_lock` from `begin_write` until their event is
/// published, so watchers see events in commit order.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<WatchEvent>,
    write_lock: Arc<Mutex<()>>,
}

/// Every object of every kind, read in one transaction.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub machines: Vec<Machine>,
    pub machine_sets: Vec<MachineSet>,
    pub machine_deployments: Vec<MachineDeployment>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            db: Arc::new(db),
            events,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for kind in ObjectKind::ALL {
            txn.open_table(table_for(kind)).map_err(map_err!(Table))?;
        }
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to committed changes.
    ///
    /// Only changes committed after this call are delivered. A receiver that
    /// falls more than the channel capacity behind observes
    /// `RecvError::Lagged` and must relist.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: WatchEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get an object by namespace and name.
    pub fn get<R: Resource>(&self, namespace: &str, name: &str) -> StateResult<Option<R>> {
        let key = object_key(namespace, name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_for(R::KIND)).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let object: R =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    /// List objects of one kind, optionally restricted to a namespace, whose
    /// labels match `selector`.
    pub fn list<R: Resource>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StateResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        read_kind(&txn, namespace, selector)
    }

    /// List every object of one kind.
    pub fn list_all<R: Resource>(&self) -> StateResult<Vec<R>> {
        self.list(None, &LabelSelector::everything())
    }

    /// Read all four kinds from a single read transaction.
    ///
    /// Unlike four `list_all` calls, no write can land between the kinds.
    pub fn snapshot(&self) -> StateResult<Snapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let everything = LabelSelector::everything();
        Ok(Snapshot {
            nodes: read_kind(&txn, None, &everything)?,
            machines: read_kind(&txn, None, &everything)?,
            machine_sets: read_kind(&txn, None, &everything)?,
            machine_deployments: read_kind(&txn, None, &everything)?,
        })
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Create a new object.
    ///
    /// Assigns a uid when the object carries none and sets the resource
    /// version to 1. Fails with `AlreadyExists` if the key is taken.
    pub fn create<R: Resource>(&self, object: &R) -> StateResult<R> {
        let mut created = object.clone();
        let key = created.key();
        let _guard = self.write_lock.lock().expect("write lock");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_for(R::KIND)).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("{} {key}", R::KIND)));
            }

            if created.metadata().uid.is_empty() {
                let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
                let next = meta
                    .get(UID_SEQUENCE_KEY)
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value())
                    .unwrap_or(0)
                    + 1;
                meta.insert(UID_SEQUENCE_KEY, next).map_err(map_err!(Write))?;
                created.metadata_mut().uid = format!("uid-{next:012}");
            }
            created.metadata_mut().resource_version = 1;

            let value = serde_json::to_vec(&created).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = %R::KIND, %key, uid = %created.metadata().uid, "object created");
        self.publish(WatchEvent::Added(created.clone().into_object()));
        Ok(created)
    }

    /// Update an existing object.
    ///
    /// The object's `resource_version` must equal the stored one; otherwise
    /// the write is rejected with `Conflict`. The uid is immutable and is
    /// carried over from the stored copy. Returns the object as stored, with
    /// its new resource version.
    pub fn update<R: Resource>(&self, object: &R) -> StateResult<R> {
        let mut updated = object.clone();
        let key = updated.key();
        let _guard = self.write_lock.lock().expect("write lock");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_for(R::KIND)).map_err(map_err!(Table))?;
            let current: R = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("{} {key}", R::KIND))),
            };

            let actual = current.metadata().resource_version;
            let expected = updated.metadata().resource_version;
            if expected != actual {
                debug!(kind = %R::KIND, %key, expected, actual, "update rejected: stale version");
                return Err(StateError::Conflict {
                    key,
                    expected,
                    actual,
                });
            }

            let meta = updated.metadata_mut();
            meta.uid = current.metadata().uid.clone();
            meta.resource_version = actual + 1;

            let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            kind = %R::KIND,
            %key,
            version = updated.metadata().resource_version,
            "object updated"
        );
        self.publish(WatchEvent::Modified(updated.clone().into_object()));
        Ok(updated)
    }

    /// Create the object, or overwrite it regardless of version if it exists.
    ///
    /// Used for seeding from manifests where the caller owns the desired state.
    pub fn apply<R: Resource>(&self, object: &R) -> StateResult<R> {
        let meta = object.metadata();
        match self.get::<R>(&meta.namespace, &meta.name)? {
            None => self.create(object),
            Some(current) => {
                let mut desired = object.clone();
                desired.metadata_mut().resource_version = current.metadata().resource_version;
                self.update(&desired)
            }
        }
    }

    /// Delete an object. Returns true if it existed.
    pub fn delete<R: Resource>(&self, namespace: &str, name: &str) -> StateResult<bool> {
        let key = object_key(namespace, name);
        let _guard = self.write_lock.lock().expect("write lock");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed: Option<R>;
        {
            let mut table = txn.open_table(table_for(R::KIND)).map_err(map_err!(Table))?;
            removed = match table.remove(key.as_str()).map_err(map_err!(Write))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = %R::KIND, %key, existed = removed.is_some(), "object deleted");
        match removed {
            Some(object) => {
                self.publish(WatchEvent::Deleted(object.into_object()));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn read_kind<R: Resource>(
    txn: &ReadTransaction,
    namespace: Option<&str>,
    selector: &LabelSelector,
) -> StateResult<Vec<R>> {
    let table = txn.open_table(table_for(R::KIND)).map_err(map_err!(Table))?;
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let object: R =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        let meta = object.metadata();
        if namespace.is_some_and(|ns| meta.namespace != ns) {
            continue;
        }
        if !selector.matches(&meta.labels) {
            continue;
        }
        results.push(object);
    }
    Ok(results)
}
