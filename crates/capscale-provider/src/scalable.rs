//! Scalable resources — the replica controller behind a node group.
//!
//! A [`ScalableResource`] wraps either a MachineSet or a MachineDeployment
//! together with its parsed bounds. Mutations never write the cached copy:
//! they re-read the authoritative object from the store, change one field
//! and write it back under the store's resource-version check, so a
//! concurrent writer surfaces as a conflict instead of being overwritten.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use capscale_state::{
    Machine, MachineDeployment, MachineSet, ObjectKind, ObjectMeta, Resource, StateError,
    StateStore,
};

use crate::bounds::MACHINE_DELETE_ANNOTATION_KEY;
use crate::controller::MachineController;
use crate::error::{ProviderError, ProviderResult};

/// The root replica controller of a node group.
#[derive(Debug, Clone)]
pub enum ScalableTarget {
    MachineSet(Arc<MachineSet>),
    MachineDeployment(Arc<MachineDeployment>),
}

impl ScalableTarget {
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ScalableTarget::MachineSet(ms) => &ms.metadata,
            ScalableTarget::MachineDeployment(md) => &md.metadata,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            ScalableTarget::MachineSet(_) => ObjectKind::MachineSet,
            ScalableTarget::MachineDeployment(_) => ObjectKind::MachineDeployment,
        }
    }

    /// `namespace/name` of the controller.
    pub fn id(&self) -> String {
        self.metadata().key()
    }

    /// Declared replicas; unset reads as 0.
    pub fn replicas(&self) -> i32 {
        match self {
            ScalableTarget::MachineSet(ms) => ms.replicas(),
            ScalableTarget::MachineDeployment(md) => md.replicas(),
        }
    }
}

/// Replica controllers whose size can be written.
trait Replicated: Resource {
    fn replicas(&self) -> i32;

    fn set_replicas(&mut self, replicas: i32);
}

impl Replicated for MachineSet {
    fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(0)
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.spec.replicas = Some(replicas);
    }
}

impl Replicated for MachineDeployment {
    fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(0)
    }

    fn set_replicas(&mut self, replicas: i32) {
        self.spec.replicas = Some(replicas);
    }
}

/// Re-read `current` from the store, set its replicas and write it back.
fn write_replicas<R: Replicated>(store: &StateStore, current: &R, replicas: i32) -> ProviderResult<R> {
    let meta = current.metadata();
    let mut latest: R = store
        .get(&meta.namespace, &meta.name)?
        .ok_or_else(|| StateError::NotFound(format!("{} {}", R::KIND, meta.key())))?;
    latest.set_replicas(replicas);
    Ok(store.update(&latest)?)
}

/// A node group's controller plus its parsed bounds.
#[derive(Clone)]
pub struct ScalableResource {
    controller: MachineController,
    target: ScalableTarget,
    min_size: i32,
    max_size: i32,
}

impl fmt::Debug for ScalableResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalableResource")
            .field("target", &self.target)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl ScalableResource {
    pub(crate) fn new(
        controller: MachineController,
        target: ScalableTarget,
        min_size: i32,
        max_size: i32,
    ) -> Self {
        Self {
            controller,
            target,
            min_size,
            max_size,
        }
    }

    pub fn id(&self) -> String {
        self.target.id()
    }

    pub fn name(&self) -> &str {
        &self.target.metadata().name
    }

    pub fn namespace(&self) -> &str {
        &self.target.metadata().namespace
    }

    pub fn kind(&self) -> ObjectKind {
        self.target.kind()
    }

    pub fn controller(&self) -> &MachineController {
        &self.controller
    }

    pub fn target(&self) -> &ScalableTarget {
        &self.target
    }

    pub fn min_size(&self) -> i32 {
        self.min_size
    }

    pub fn max_size(&self) -> i32 {
        self.max_size
    }

    /// Declared replicas of the last observed snapshot.
    pub fn replicas(&self) -> i32 {
        self.target.replicas()
    }

    /// Names of the nodes currently backing this resource.
    pub fn nodes(&self) -> Vec<String> {
        match &self.target {
            ScalableTarget::MachineSet(ms) => self.controller.machine_set_node_names(ms),
            ScalableTarget::MachineDeployment(md) => {
                self.controller.machine_deployment_node_names(md)
            }
        }
    }

    /// Persist a new replica count.
    ///
    /// On success the local snapshot is replaced by the stored object, so
    /// [`replicas`](Self::replicas) reflects the write immediately.
    pub fn set_size(&mut self, replicas: i32) -> ProviderResult<()> {
        if replicas < 0 {
            return Err(ProviderError::InvalidSize(replicas));
        }

        let store = self.controller.store();
        self.target = match &self.target {
            ScalableTarget::MachineSet(ms) => {
                ScalableTarget::MachineSet(Arc::new(write_replicas(store, ms.as_ref(), replicas)?))
            }
            ScalableTarget::MachineDeployment(md) => ScalableTarget::MachineDeployment(Arc::new(
                write_replicas(store, md.as_ref(), replicas)?,
            )),
        };

        info!(id = %self.id(), kind = %self.kind(), replicas, "replicas updated");
        Ok(())
    }

    /// Mark the Machines behind `node_names` for deletion.
    ///
    /// Every node is resolved and checked for membership before anything is
    /// written. Machines are then annotated one by one; a failure part way
    /// leaves the earlier annotations in place.
    pub fn delete_nodes(&self, node_names: &[String]) -> ProviderResult<Vec<Arc<Machine>>> {
        let mut machines = Vec::with_capacity(node_names.len());
        for name in node_names {
            let machine = self
                .controller
                .find_node_by_node_name(name)
                .and_then(|node| self.controller.find_machine_by_node_provider_id(&node))
                .ok_or_else(|| ProviderError::UnresolvableNode(name.clone()))?;

            if !self.owns_machine(&machine) {
                warn!(node = %name, group = %self.id(), "node belongs to another group");
                return Err(ProviderError::NodeNotInGroup {
                    node: name.clone(),
                    group: self.id(),
                });
            }
            machines.push(machine);
        }

        let store = self.controller.store();
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        for machine in &machines {
            let meta = &machine.metadata;
            let mut latest: Machine = store
                .get(&meta.namespace, &meta.name)?
                .ok_or_else(|| StateError::NotFound(format!("Machine {}", meta.key())))?;
            latest
                .metadata
                .annotations
                .insert(MACHINE_DELETE_ANNOTATION_KEY.to_string(), stamp.clone());
            store.update(&latest)?;
            debug!(machine = %meta.key(), group = %self.id(), "machine marked for deletion");
        }

        Ok(machines)
    }

    /// Whether `machine` is owned, directly or through a MachineSet, by this
    /// resource.
    pub fn owns_machine(&self, machine: &Machine) -> bool {
        let Some(machine_set) = self.controller.find_machine_owner(machine) else {
            return false;
        };
        match &self.target {
            ScalableTarget::MachineSet(ms) => machine_set.metadata.uid == ms.metadata.uid,
            ScalableTarget::MachineDeployment(md) => self
                .controller
                .find_machine_set_owner(&machine_set)
                .is_some_and(|owner| owner.metadata.uid == md.metadata.uid),
        }
    }
}
