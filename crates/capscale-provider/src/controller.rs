//! Machine controller — topology resolution over the informer cache.
//!
//! Every lookup is a bounded pointer chase over immutable cache snapshots:
//!
//! ```text
//! Node      ─(provider id, machine annotation)─▶ Machine
//! Machine   ─(owner ref kind=MachineSet, uid)──▶ MachineSet
//! MachineSet─(owner ref kind=MachineDeployment)▶ MachineDeployment
//! ```
//!
//! Each hop re-checks name and uid against the current cache, so a reference
//! that outlived its target (deleted and recreated under the same name) never
//! resolves. A missing link is a normal transient state while nodes join or
//! leave and yields `None`, never an error.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use capscale_informer::{ObjectCache, TypedStore};
use capscale_state::{
    Machine, MachineDeployment, MachineSet, Node, OwnerReference, Resource, StateStore,
    object_key,
};

use crate::bounds::{is_eligible, parse_scaling_bounds};
use crate::error::{ProviderError, ProviderResult};
use crate::nodegroup::MachineNodeGroup;
use crate::scalable::{ScalableResource, ScalableTarget};

/// Node annotation pointing at the backing Machine as `namespace/name`.
pub const MACHINE_ANNOTATION_KEY: &str = "cluster.k8s.io/machine";

/// Resolves nodes to node groups and enumerates node groups.
///
/// Cheap to clone: holds a shared cache handle and a store handle.
#[derive(Clone)]
pub struct MachineController {
    cache: ObjectCache,
    store: StateStore,
}

impl fmt::Debug for MachineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineController")
            .field("synced", &self.cache.has_synced())
            .finish_non_exhaustive()
    }
}

impl MachineController {
    /// Create a controller over a synced cache.
    pub fn new(cache: ObjectCache, store: StateStore) -> Self {
        debug_assert!(cache.has_synced(), "controller built on an unsynced cache");
        Self { cache, store }
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// The authoritative store that mutations are written to.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Lookups ────────────────────────────────────────────────────

    /// Look up a Machine by `namespace/name`.
    pub fn find_machine(&self, key: &str) -> Option<Arc<Machine>> {
        self.cache.machines().get(key)
    }

    /// Look up a Node by name.
    pub fn find_node_by_node_name(&self, name: &str) -> Option<Arc<Node>> {
        self.cache.nodes().get(name)
    }

    /// Find the cached Node carrying `provider_id`.
    ///
    /// Served from the cache's provider-id index. If several Nodes claim the
    /// same id, the one with the lowest name wins.
    pub fn find_node_by_provider_id(&self, provider_id: &str) -> Option<Arc<Node>> {
        if provider_id.is_empty() {
            return None;
        }
        let mut nodes = self.cache.nodes().get_by_index(provider_id).into_iter();
        let first = nodes.next()?;
        let others = nodes.count();
        if others > 0 {
            warn!(
                %provider_id,
                node = %first.metadata.name,
                others,
                "provider id shared by several nodes"
            );
        }
        Some(first)
    }

    /// The MachineSet owning `machine`, if it still exists with the
    /// referenced uid.
    pub fn find_machine_owner(&self, machine: &Machine) -> Option<Arc<MachineSet>> {
        find_owner(
            self.cache.machine_sets(),
            &machine.metadata.namespace,
            &machine.metadata.owner_references,
        )
    }

    /// The MachineDeployment owning `machine_set`, if it still exists with
    /// the referenced uid.
    pub fn find_machine_set_owner(&self, machine_set: &MachineSet) -> Option<Arc<MachineDeployment>> {
        find_owner(
            self.cache.machine_deployments(),
            &machine_set.metadata.namespace,
            &machine_set.metadata.owner_references,
        )
    }

    /// The controller a MachineSet's nodes are scaled through: its owning
    /// MachineDeployment when there is one, otherwise the MachineSet itself.
    pub fn resolve_root(&self, machine_set: Arc<MachineSet>) -> ScalableTarget {
        match self.find_machine_set_owner(&machine_set) {
            Some(deployment) => ScalableTarget::MachineDeployment(deployment),
            None => ScalableTarget::MachineSet(machine_set),
        }
    }

    /// Map a node to its Machine via the cached node's machine annotation.
    ///
    /// The node is looked up in the cache by provider id, so the cached
    /// copy's annotations are used rather than the caller's.
    pub fn find_machine_by_node_provider_id(&self, node: &Node) -> Option<Arc<Machine>> {
        let provider_id = &node.spec.provider_id;
        if provider_id.is_empty() {
            debug!(node = %node.metadata.name, "node has no provider id");
            return None;
        }

        let Some(cached) = self.find_node_by_provider_id(provider_id) else {
            debug!(node = %node.metadata.name, %provider_id, "no cached node with provider id");
            return None;
        };

        let Some(pointer) = cached.metadata.annotations.get(MACHINE_ANNOTATION_KEY) else {
            debug!(node = %cached.metadata.name, "node has no machine annotation");
            return None;
        };

        let Some((namespace, name)) = pointer
            .split_once('/')
            .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
        else {
            warn!(
                node = %cached.metadata.name,
                annotation = %pointer,
                "malformed machine annotation, expected namespace/name"
            );
            return None;
        };

        self.find_machine(&object_key(namespace, name))
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Names of the nodes backing Machines owned by `machine_set`.
    pub fn machine_set_node_names(&self, machine_set: &MachineSet) -> Vec<String> {
        let meta = &machine_set.metadata;
        let machines = self.cache.machines().list_filtered(|machine| {
            machine.metadata.namespace == meta.namespace
                && is_owned_by(&machine.metadata.owner_references, machine_set)
        });

        let mut names = Vec::with_capacity(machines.len());
        for machine in &machines {
            match &machine.status.node_ref {
                None => {
                    debug!(machine = %machine.key(), "machine has no node ref yet");
                }
                Some(node_ref) if node_ref.kind != "Node" => {
                    warn!(
                        machine = %machine.key(),
                        kind = %node_ref.kind,
                        "machine node ref does not reference a Node"
                    );
                }
                Some(node_ref) => names.push(node_ref.name.clone()),
            }
        }

        names.sort();
        trace!(machine_set = %meta.key(), nodes = ?names, "machine set nodes");
        names
    }

    /// Names of the nodes across every MachineSet owned by `deployment`.
    pub fn machine_deployment_node_names(&self, deployment: &MachineDeployment) -> Vec<String> {
        let meta = &deployment.metadata;
        let machine_sets = self.cache.machine_sets().list_filtered(|ms| {
            ms.metadata.namespace == meta.namespace
                && is_owned_by(&ms.metadata.owner_references, deployment)
        });

        let mut names: Vec<String> = machine_sets
            .iter()
            .flat_map(|ms| self.machine_set_node_names(ms))
            .collect();
        names.sort();
        names
    }

    // ── Node groups ────────────────────────────────────────────────

    /// The node group owning `node`, if any.
    ///
    /// Returns `Ok(None)` when any link of the chain is missing or the
    /// root controller is not eligible. Only malformed bounds are an error.
    pub fn node_group_for_node(&self, node: &Node) -> ProviderResult<Option<MachineNodeGroup>> {
        let Some(machine) = self.find_machine_by_node_provider_id(node) else {
            return Ok(None);
        };

        let Some(machine_set) = self.find_machine_owner(&machine) else {
            debug!(machine = %machine.key(), "machine has no live owner");
            return Ok(None);
        };

        let target = self.resolve_root(machine_set);
        Ok(self.scalable_resource(target)?.map(MachineNodeGroup::new))
    }

    /// Every eligible node group in the cluster, sorted by id.
    ///
    /// MachineSets owned by a live MachineDeployment surface through the
    /// deployment only. A single malformed bounds annotation fails the whole
    /// call; no partial list is returned.
    pub fn node_groups(&self) -> ProviderResult<Vec<MachineNodeGroup>> {
        let mut targets = Vec::new();

        for machine_set in self.cache.machine_sets().list() {
            match self.resolve_root(machine_set) {
                ScalableTarget::MachineDeployment(_) => continue,
                target => targets.push(target),
            }
        }
        for deployment in self.cache.machine_deployments().list() {
            targets.push(ScalableTarget::MachineDeployment(deployment));
        }

        let mut groups = Vec::new();
        for target in targets {
            if let Some(resource) = self.scalable_resource(target)? {
                groups.push(MachineNodeGroup::new(resource));
            }
        }

        groups.sort_by_key(|group| group.resource().id());
        debug!(count = groups.len(), "node groups discovered");
        Ok(groups)
    }

    /// Validate bounds and wrap an eligible target.
    fn scalable_resource(&self, target: ScalableTarget) -> ProviderResult<Option<ScalableResource>> {
        let (min_size, max_size) = parse_scaling_bounds(&target.metadata().annotations).map_err(
            |source| ProviderError::InvalidBounds {
                id: target.id(),
                source,
            },
        )?;

        if !is_eligible(min_size, max_size) {
            trace!(id = %target.id(), min_size, max_size, "not a node group");
            return Ok(None);
        }

        Ok(Some(ScalableResource::new(
            self.clone(),
            target,
            min_size,
            max_size,
        )))
    }
}

/// Resolve the first owner reference of kind `O` whose target is cached with
/// a matching uid.
fn find_owner<O: Resource>(
    store: &TypedStore<O>,
    namespace: &str,
    owner_references: &[OwnerReference],
) -> Option<Arc<O>> {
    owner_references
        .iter()
        .filter(|owner| owner.kind == O::KIND.as_str())
        .find_map(|owner| {
            let candidate = store.get(&object_key(namespace, &owner.name))?;
            if candidate.metadata().uid == owner.uid {
                Some(candidate)
            } else {
                debug!(
                    kind = %O::KIND,
                    name = %owner.name,
                    "owner uid mismatch, ignoring stale reference"
                );
                None
            }
        })
}

/// Whether `owner_references` names `owner` by kind, name and uid.
pub(crate) fn is_owned_by<O: Resource>(owner_references: &[OwnerReference], owner: &O) -> bool {
    let meta = owner.metadata();
    owner_references.iter().any(|r| {
        r.kind == O::KIND.as_str() && r.name == meta.name && r.uid == meta.uid
    })
}
