//! JSON manifests for seeding the object store.
//!
//! ```json
//! { "objects": [
//!     { "kind": "MachineSet", "metadata": { "name": "pool", "namespace": "default",
//!       "uid": "ms-1", "annotations": { ... } }, "spec": { "replicas": 2 } },
//!     ...
//! ] }
//! ```
//!
//! Owner references match by uid, so objects that are referenced as owners
//! should carry an explicit uid.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use capscale_state::{Object, StateResult, StateStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub objects: Vec<Object>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    /// Write every object to the store, owners before dependents.
    ///
    /// Existing objects are overwritten. Returns the number of objects
    /// written.
    pub fn apply(&self, store: &StateStore) -> StateResult<usize> {
        let mut objects: Vec<&Object> = self.objects.iter().collect();
        objects.sort_by_key(|object| apply_order(object));

        for object in &objects {
            match object {
                Object::MachineDeployment(o) => store.apply(o).map(drop)?,
                Object::MachineSet(o) => store.apply(o).map(drop)?,
                Object::Machine(o) => store.apply(o).map(drop)?,
                Object::Node(o) => store.apply(o).map(drop)?,
            }
        }

        info!(count = objects.len(), "manifest applied");
        Ok(objects.len())
    }
}

fn apply_order(object: &Object) -> u8 {
    match object {
        Object::MachineDeployment(_) => 0,
        Object::MachineSet(_) => 1,
        Object::Machine(_) => 2,
        Object::Node(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capscale_state::{Machine, MachineSet, Node};

    const MANIFEST: &str = r#"{
        "objects": [
            { "kind": "Node",
              "metadata": { "name": "node-1",
                            "annotations": { "cluster.k8s.io/machine": "default/machine-1" } },
              "spec": { "provider_id": "test:///node-1" } },
            { "kind": "Machine",
              "metadata": { "name": "machine-1", "namespace": "default",
                            "owner_references": [ { "kind": "MachineSet", "name": "pool", "uid": "ms-1" } ] },
              "status": { "node_ref": { "kind": "Node", "name": "node-1" } } },
            { "kind": "MachineSet",
              "metadata": { "name": "pool", "namespace": "default", "uid": "ms-1",
                            "annotations": {
                                "cluster.k8s.io/cluster-api-autoscaler-node-group-min-size": "1",
                                "cluster.k8s.io/cluster-api-autoscaler-node-group-max-size": "5" } },
              "spec": { "replicas": 1 } }
        ]
    }"#;

    #[test]
    fn apply_seeds_store() {
        let manifest: Manifest = serde_json::from_str(MANIFEST).unwrap();
        let store = StateStore::open_in_memory().unwrap();

        assert_eq!(manifest.apply(&store).unwrap(), 3);

        let ms: MachineSet = store.get("default", "pool").unwrap().unwrap();
        assert_eq!(ms.metadata.uid, "ms-1");
        assert_eq!(ms.spec.replicas, Some(1));

        let machine: Machine = store.get("default", "machine-1").unwrap().unwrap();
        assert_eq!(machine.metadata.owner_references[0].uid, "ms-1");
        assert!(!machine.metadata.uid.is_empty());

        let node: Node = store.get("", "node-1").unwrap().unwrap();
        assert_eq!(node.spec.provider_id, "test:///node-1");
    }

    #[test]
    fn reapply_overwrites() {
        let mut manifest: Manifest = serde_json::from_str(MANIFEST).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        manifest.apply(&store).unwrap();

        for object in &mut manifest.objects {
            if let Object::MachineSet(ms) = object {
                ms.spec.replicas = Some(4);
            }
        }
        manifest.apply(&store).unwrap();

        let ms: MachineSet = store.get("default", "pool").unwrap().unwrap();
        assert_eq!(ms.spec.replicas, Some(4));
        assert_eq!(ms.metadata.resource_version, 2);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let bad = r#"{ "objects": [ { "kind": "Pod", "metadata": { "name": "p" } } ] }"#;
        assert!(serde_json::from_str::<Manifest>(bad).is_err());
    }
}
