//! Cloud-provider facade handed to the capacity planner.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use capscale_state::Node;

use crate::controller::MachineController;
use crate::error::{ProviderError, ProviderResult};
use crate::nodegroup::{MachineNodeGroup, NodeGroup};

/// Default provider name.
pub const PROVIDER_NAME: &str = "clusterapi";

/// Node label carrying the accelerator type.
pub const GPU_LABEL: &str = "cluster-api/accelerator";

/// Cluster-wide resource bounds, passed through to the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimiter {
    pub min_cores: u64,
    pub max_cores: u64,
    /// Bytes.
    pub min_memory: u64,
    /// Bytes.
    pub max_memory: u64,
}

/// Entry point for the planner: discovery plus the unsupported parts of the
/// cloud-provider surface.
#[derive(Debug, Clone)]
pub struct ClusterApiProvider {
    name: String,
    controller: MachineController,
    resource_limiter: ResourceLimiter,
}

impl ClusterApiProvider {
    pub fn new(name: &str, controller: MachineController, resource_limiter: ResourceLimiter) -> Self {
        Self {
            name: name.to_string(),
            controller,
            resource_limiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gpu_label(&self) -> &'static str {
        GPU_LABEL
    }

    pub fn available_gpu_types(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    pub fn controller(&self) -> &MachineController {
        &self.controller
    }

    /// Every eligible node group, sorted by id.
    pub fn node_groups(&self) -> ProviderResult<Vec<MachineNodeGroup>> {
        let groups = self.controller.node_groups().inspect_err(|e| {
            error!(error = %e, "error getting node groups");
        })?;
        for group in &groups {
            debug!(group = %group.debug(), "discovered node group");
        }
        Ok(groups)
    }

    /// The node group with the given `namespace/name` id.
    pub fn node_group(&self, id: &str) -> ProviderResult<Option<MachineNodeGroup>> {
        Ok(self.node_groups()?.into_iter().find(|group| group.id() == id))
    }

    pub fn node_group_for_node(&self, node: &Node) -> ProviderResult<Option<MachineNodeGroup>> {
        self.controller.node_group_for_node(node)
    }

    pub fn instance_id<'a>(&self, node: &'a Node) -> &'a str {
        &node.spec.provider_id
    }

    pub fn pricing(&self) -> ProviderResult<()> {
        Err(ProviderError::NotImplemented)
    }

    pub fn available_machine_types(&self) -> Vec<String> {
        Vec::new()
    }

    pub fn new_node_group(
        &self,
        _machine_type: &str,
        _labels: &BTreeMap<String, String>,
    ) -> ProviderResult<MachineNodeGroup> {
        Err(ProviderError::NotImplemented)
    }

    pub fn resource_limiter(&self) -> &ResourceLimiter {
        &self.resource_limiter
    }

    pub fn refresh(&self) -> ProviderResult<()> {
        Ok(())
    }

    pub fn cleanup(&self) -> ProviderResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn limiter() -> ResourceLimiter {
        ResourceLimiter {
            min_cores: 1,
            max_cores: 64,
            min_memory: 1 << 30,
            max_memory: 256 << 30,
        }
    }

    #[test]
    fn static_surface() {
        let controller = test_controller(&[]);
        let provider = ClusterApiProvider::new(PROVIDER_NAME, controller, limiter());

        assert_eq!(provider.name(), "clusterapi");
        assert_eq!(provider.gpu_label(), "cluster-api/accelerator");
        assert!(provider.available_gpu_types().is_empty());
        assert!(provider.available_machine_types().is_empty());
        assert_eq!(provider.resource_limiter(), &limiter());
        assert!(provider.refresh().is_ok());
        assert!(provider.cleanup().is_ok());
        assert!(matches!(provider.pricing(), Err(ProviderError::NotImplemented)));
        assert!(matches!(
            provider.new_node_group("m5.large", &BTreeMap::new()),
            Err(ProviderError::NotImplemented)
        ));
        assert!(provider.node_groups().unwrap().is_empty());
    }

    #[test]
    fn instance_id_is_provider_id() {
        let config = machine_set_config(TEST_NAMESPACE, 1, 1, bounds("1", "10"));
        let provider = ClusterApiProvider::new(
            PROVIDER_NAME,
            test_controller(&[&config]),
            ResourceLimiter::default(),
        );
        assert_eq!(
            provider.instance_id(&config.nodes[0]),
            config.nodes[0].spec.provider_id
        );
    }

    #[test]
    fn node_group_by_id() {
        let configs = machine_deployment_configs(TEST_NAMESPACE, 2, 1, 1, bounds("1", "10"));
        let refs: Vec<&TestConfig> = configs.iter().collect();
        let provider = ClusterApiProvider::new(
            PROVIDER_NAME,
            test_controller(&refs),
            ResourceLimiter::default(),
        );

        let id = configs[1].group_id();
        let group = provider.node_group(&id).unwrap().unwrap();
        assert_eq!(group.id(), id);
        assert!(provider.node_group("nowhere/nothing").unwrap().is_none());
    }

    #[test]
    fn node_groups_propagates_bad_bounds() {
        let good = machine_set_config("good", 1, 1, bounds("1", "10"));
        let bad = machine_set_config("bad", 1, 1, bounds("1", "ten"));
        let provider = ClusterApiProvider::new(
            PROVIDER_NAME,
            test_controller(&[&good, &bad]),
            ResourceLimiter::default(),
        );

        assert!(matches!(
            provider.node_groups(),
            Err(ProviderError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn resource_limiter_deserializes_with_defaults() {
        let limiter: ResourceLimiter = serde_json::from_str(r#"{"max_cores": 32}"#).unwrap();
        assert_eq!(limiter.max_cores, 32);
        assert_eq!(limiter.min_cores, 0);
        assert_eq!(limiter.max_memory, 0);
    }
}
