//! Object types for the capscale object store.
//!
//! These mirror the subset of the cluster API that the autoscaler provider
//! needs: object metadata with owner references, Nodes, Machines and the two
//! replica controllers (MachineSet, MachineDeployment). All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Unique identifier assigned to an object when it is created.
pub type Uid = String;

/// Build the cache/table key for an object.
///
/// Cluster-scoped objects (empty namespace) are keyed by name alone.
pub fn object_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

// ── Kinds ─────────────────────────────────────────────────────────

/// The object kinds held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Node,
    Machine,
    MachineSet,
    MachineDeployment,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Node,
        ObjectKind::Machine,
        ObjectKind::MachineSet,
        ObjectKind::MachineDeployment,
    ];

    /// Kind name as it appears in owner and object references.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Node => "Node",
            ObjectKind::Machine => "Machine",
            ObjectKind::MachineSet => "MachineSet",
            ObjectKind::MachineDeployment => "MachineDeployment",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metadata ──────────────────────────────────────────────────────

/// Typed, uid-qualified back-pointer from a child object to its controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uid,
}

impl OwnerReference {
    /// Owner reference pointing at the given object.
    pub fn to<R: Resource>(owner: &R) -> Self {
        Self {
            kind: R::KIND.as_str().to_string(),
            name: owner.metadata().name.clone(),
            uid: owner.metadata().uid.clone(),
        }
    }
}

/// Reference from a Machine to the object (normally a Node) backing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// Metadata common to every stored object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    /// Empty for cluster-scoped objects (Nodes).
    #[serde(default)]
    pub namespace: String,
    /// Assigned by the store on create unless supplied.
    #[serde(default)]
    pub uid: Uid,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = uid.to_string();
        self
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }
}

/// Equality-based label selector. An empty selector matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A worker node registered in the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    /// Instance id assigned by the infrastructure provider.
    #[serde(default)]
    pub provider_id: String,
}

// ── Machine ───────────────────────────────────────────────────────

/// One provisioned compute instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MachineSpec,
    #[serde(default)]
    pub status: MachineStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineSpec {
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineStatus {
    /// Set once the machine's node has registered.
    #[serde(default)]
    pub node_ref: Option<ObjectReference>,
}

// ── Replica controllers ───────────────────────────────────────────

/// Declares a desired number of Machines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MachineSetSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineSetSpec {
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub selector: LabelSelector,
}

/// Manages a rolling set of MachineSets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineDeployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MachineDeploymentSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineDeploymentSpec {
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub selector: LabelSelector,
}

// ── Resource trait ────────────────────────────────────────────────

/// Implemented by every kind the store can hold.
pub trait Resource:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ObjectKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn into_object(self) -> Object;

    fn from_object(object: Object) -> Option<Self>;

    fn key(&self) -> String {
        self.metadata().key()
    }
}

macro_rules! impl_resource {
    ($ty:ident) => {
        impl Resource for $ty {
            const KIND: ObjectKind = ObjectKind::$ty;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn into_object(self) -> Object {
                Object::$ty(self)
            }

            fn from_object(object: Object) -> Option<Self> {
                match object {
                    Object::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_resource!(Node);
impl_resource!(Machine);
impl_resource!(MachineSet);
impl_resource!(MachineDeployment);

/// Any stored object, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum Object {
    Node(Node),
    Machine(Machine),
    MachineSet(MachineSet),
    MachineDeployment(MachineDeployment),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Node(_) => ObjectKind::Node,
            Object::Machine(_) => ObjectKind::Machine,
            Object::MachineSet(_) => ObjectKind::MachineSet,
            Object::MachineDeployment(_) => ObjectKind::MachineDeployment,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Object::Node(o) => &o.metadata,
            Object::Machine(o) => &o.metadata,
            Object::MachineSet(o) => &o.metadata,
            Object::MachineDeployment(o) => &o.metadata,
        }
    }
}

// ── Watch ─────────────────────────────────────────────────────────

/// A committed change, published by the store after each write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(Object),
    Modified(Object),
    /// Carries the last stored state of the removed object.
    Deleted(Object),
}

impl WatchEvent {
    pub fn object(&self) -> &Object {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_cluster_scoped() {
        assert_eq!(object_key("", "node-1"), "node-1");
        assert_eq!(object_key("default", "ms-1"), "default/ms-1");
    }

    #[test]
    fn empty_selector_matches_everything() {
        let mut labels = BTreeMap::new();
        labels.insert("pool".to_string(), "a".to_string());

        assert!(LabelSelector::everything().matches(&labels));
        assert!(LabelSelector::everything().matches(&BTreeMap::new()));
    }

    #[test]
    fn selector_requires_all_labels() {
        let mut selector = LabelSelector::default();
        selector
            .match_labels
            .insert("pool".to_string(), "a".to_string());
        selector
            .match_labels
            .insert("zone".to_string(), "1".to_string());

        let mut labels = BTreeMap::new();
        labels.insert("pool".to_string(), "a".to_string());
        assert!(!selector.matches(&labels));

        labels.insert("zone".to_string(), "1".to_string());
        assert!(selector.matches(&labels));

        labels.insert("zone".to_string(), "2".to_string());
        assert!(!selector.matches(&labels));
    }

    #[test]
    fn owner_reference_points_at_owner() {
        let ms = MachineSet {
            metadata: ObjectMeta::new("default", "workers").with_uid("uid-7"),
            ..Default::default()
        };
        let owner = OwnerReference::to(&ms);
        assert_eq!(owner.kind, "MachineSet");
        assert_eq!(owner.name, "workers");
        assert_eq!(owner.uid, "uid-7");
    }

    #[test]
    fn object_serializes_with_kind_tag() {
        let node = Node {
            metadata: ObjectMeta::new("", "node-1"),
            spec: NodeSpec {
                provider_id: "aws:///i-1".to_string(),
            },
        };
        let json = serde_json::to_value(node.clone().into_object()).unwrap();
        assert_eq!(json["kind"], "Node");

        let back: Object = serde_json::from_value(json).unwrap();
        assert_eq!(Node::from_object(back), Some(node));
    }
}
