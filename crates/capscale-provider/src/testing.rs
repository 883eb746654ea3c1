//! Test fixtures: small cluster topologies seeded into a fresh store.

use std::collections::BTreeMap;
use std::fmt;

use capscale_informer::ObjectCache;
use capscale_state::{
    Machine, MachineDeployment, MachineDeploymentSpec, MachineSet, MachineSetSpec, MachineSpec,
    MachineStatus, Node, NodeSpec, ObjectMeta, ObjectReference, OwnerReference, Resource,
    StateStore,
};

use crate::bounds::{NODE_GROUP_MAX_SIZE_ANNOTATION_KEY, NODE_GROUP_MIN_SIZE_ANNOTATION_KEY};
use crate::controller::{MACHINE_ANNOTATION_KEY, MachineController};

pub(crate) const TEST_NAMESPACE: &str = "test-namespace";

/// One replica controller with its Machines and Nodes.
#[derive(Debug, Clone)]
pub(crate) struct TestConfig {
    pub machine_deployment: Option<MachineDeployment>,
    pub machine_set: MachineSet,
    pub machines: Vec<Machine>,
    pub nodes: Vec<Node>,
}

impl TestConfig {
    /// Id of the node group this config forms.
    pub fn group_id(&self) -> String {
        match &self.machine_deployment {
            Some(deployment) => deployment.key(),
            None => self.machine_set.key(),
        }
    }
}

pub(crate) fn bounds(min: &str, max: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NODE_GROUP_MIN_SIZE_ANNOTATION_KEY.to_string(), min.to_string()),
        (NODE_GROUP_MAX_SIZE_ANNOTATION_KEY.to_string(), max.to_string()),
    ])
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta::new(namespace, name).with_uid(&format!("uid-{namespace}-{name}"))
}

/// A Machine owned by `owner` and the Node it backs.
pub(crate) fn make_linked_node_and_machine(
    id: impl fmt::Display,
    namespace: &str,
    owner: &OwnerReference,
) -> (Node, Machine) {
    let machine_name = format!("machine-{id}");
    let node_name = format!("{namespace}-node-{id}");
    let provider_id = format!("test:///{node_name}");

    let node = Node {
        metadata: ObjectMeta::new("", &node_name).with_annotations(BTreeMap::from([(
            MACHINE_ANNOTATION_KEY.to_string(),
            format!("{namespace}/{machine_name}"),
        )])),
        spec: NodeSpec {
            provider_id: provider_id.clone(),
        },
    };

    let machine = Machine {
        metadata: meta(namespace, &machine_name).with_owner(owner.clone()),
        spec: MachineSpec {
            provider_id: Some(provider_id),
        },
        status: MachineStatus {
            node_ref: Some(ObjectReference {
                kind: "Node".to_string(),
                name: node_name,
                namespace: String::new(),
            }),
        },
    };

    (node, machine)
}

fn make_config(
    namespace: &str,
    index: usize,
    is_deployment: bool,
    node_count: usize,
    replicas: i32,
    annotations: BTreeMap<String, String>,
) -> TestConfig {
    let (prefix, ms_name) = if is_deployment {
        ("md", format!("machinedeployment-{index}-machineset"))
    } else {
        ("ms", format!("machineset-{index}"))
    };
    let mut machine_set = MachineSet {
        metadata: meta(namespace, &ms_name),
        spec: MachineSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        },
    };

    let machine_deployment = if is_deployment {
        let deployment = MachineDeployment {
            metadata: meta(namespace, &format!("machinedeployment-{index}"))
                .with_annotations(annotations),
            spec: MachineDeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            },
        };
        machine_set
            .metadata
            .owner_references
            .push(OwnerReference::to(&deployment));
        Some(deployment)
    } else {
        machine_set.metadata.annotations = annotations;
        None
    };

    let owner = OwnerReference::to(&machine_set);
    let (nodes, machines): (Vec<Node>, Vec<Machine>) = (0..node_count)
        .map(|j| make_linked_node_and_machine(format!("{prefix}-{index}-{j}"), namespace, &owner))
        .unzip();

    TestConfig {
        machine_deployment,
        machine_set,
        machines,
        nodes,
    }
}

/// A MachineSet-rooted group with `node_count` linked nodes.
pub(crate) fn machine_set_config(
    namespace: &str,
    node_count: usize,
    replicas: i32,
    annotations: BTreeMap<String, String>,
) -> TestConfig {
    make_config(namespace, 0, false, node_count, replicas, annotations)
}

pub(crate) fn machine_set_configs(
    namespace: &str,
    count: usize,
    node_count: usize,
    replicas: i32,
    annotations: BTreeMap<String, String>,
) -> Vec<TestConfig> {
    (0..count)
        .map(|i| make_config(namespace, i, false, node_count, replicas, annotations.clone()))
        .collect()
}

/// A MachineDeployment-rooted group with one MachineSet.
pub(crate) fn machine_deployment_config(
    namespace: &str,
    node_count: usize,
    replicas: i32,
    annotations: BTreeMap<String, String>,
) -> TestConfig {
    make_config(namespace, 0, true, node_count, replicas, annotations)
}

pub(crate) fn machine_deployment_configs(
    namespace: &str,
    count: usize,
    node_count: usize,
    replicas: i32,
    annotations: BTreeMap<String, String>,
) -> Vec<TestConfig> {
    (0..count)
        .map(|i| make_config(namespace, i, true, node_count, replicas, annotations.clone()))
        .collect()
}

/// Write every object of `configs` into a fresh in-memory store.
pub(crate) fn seed_store(configs: &[&TestConfig]) -> StateStore {
    let store = StateStore::open_in_memory().unwrap();
    for config in configs {
        if let Some(deployment) = &config.machine_deployment {
            store.create(deployment).unwrap();
        }
        store.create(&config.machine_set).unwrap();
        for machine in &config.machines {
            store.create(machine).unwrap();
        }
        for node in &config.nodes {
            store.create(node).unwrap();
        }
    }
    store
}

/// Controller over a store seeded with `configs`.
pub(crate) fn test_controller(configs: &[&TestConfig]) -> MachineController {
    let store = seed_store(configs);
    let cache = ObjectCache::from_store(&store).unwrap();
    MachineController::new(cache, store)
}

pub(crate) fn add_config(cache: &ObjectCache, config: &TestConfig) {
    if let Some(deployment) = &config.machine_deployment {
        cache.machine_deployments().insert(deployment.clone());
    }
    cache.machine_sets().insert(config.machine_set.clone());
    for machine in &config.machines {
        cache.machines().insert(machine.clone());
    }
    for node in &config.nodes {
        cache.nodes().insert(node.clone());
    }
}

pub(crate) fn delete_config(cache: &ObjectCache, config: &TestConfig) {
    if let Some(deployment) = &config.machine_deployment {
        cache.machine_deployments().remove(&deployment.key());
    }
    cache.machine_sets().remove(&config.machine_set.key());
    for machine in &config.machines {
        cache.machines().remove(&machine.key());
    }
    for node in &config.nodes {
        cache.nodes().remove(&node.key());
    }
}
