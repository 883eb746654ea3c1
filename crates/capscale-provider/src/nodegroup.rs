//! Node groups — the resizable unit exposed to the capacity planner.

use tracing::{debug, info};

use capscale_state::Node;

use crate::error::{ProviderError, ProviderResult};
use crate::scalable::ScalableResource;

/// A set of nodes the planner can grow, shrink or prune.
pub trait NodeGroup: Send + Sync {
    /// Stable identifier, `namespace/name` of the root controller.
    fn id(&self) -> String;

    /// One-line summary for logs.
    fn debug(&self) -> String;

    fn min_size(&self) -> i32;

    fn max_size(&self) -> i32;

    /// Desired replica count. Actual node count converges to it over time.
    fn target_size(&self) -> ProviderResult<i32>;

    /// Grow by `delta` nodes, never past `max_size`.
    fn increase_size(&mut self, delta: i32) -> ProviderResult<()>;

    /// Shrink the target by `-delta` without removing any registered node.
    ///
    /// Only pending, not yet registered nodes can be given up this way;
    /// removing a specific node goes through [`delete_nodes`](Self::delete_nodes).
    fn decrease_target_size(&mut self, delta: i32) -> ProviderResult<()>;

    /// Mark the given nodes for removal.
    fn delete_nodes(&mut self, nodes: &[Node]) -> ProviderResult<()>;

    /// Names of the nodes currently in the group.
    fn nodes(&self) -> ProviderResult<Vec<String>>;

    /// Template of a freshly started node, for scale-up simulation.
    fn template_node_info(&self) -> ProviderResult<Node>;

    fn exist(&self) -> bool;

    fn create(&self) -> ProviderResult<Box<dyn NodeGroup>>;

    fn delete(&self) -> ProviderResult<()>;

    fn autoprovisioned(&self) -> bool;
}

/// [`NodeGroup`] backed by a MachineSet or MachineDeployment.
#[derive(Debug, Clone)]
pub struct MachineNodeGroup {
    resource: ScalableResource,
}

impl MachineNodeGroup {
    pub fn new(resource: ScalableResource) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &ScalableResource {
        &self.resource
    }

    pub fn into_resource(self) -> ScalableResource {
        self.resource
    }
}

impl NodeGroup for MachineNodeGroup {
    fn id(&self) -> String {
        self.resource.id()
    }

    fn debug(&self) -> String {
        format!(
            "{} (min: {}, max: {}, replicas: {})",
            self.id(),
            self.min_size(),
            self.max_size(),
            self.resource.replicas()
        )
    }

    fn min_size(&self) -> i32 {
        self.resource.min_size()
    }

    fn max_size(&self) -> i32 {
        self.resource.max_size()
    }

    fn target_size(&self) -> ProviderResult<i32> {
        Ok(self.resource.replicas())
    }

    fn increase_size(&mut self, delta: i32) -> ProviderResult<()> {
        if delta <= 0 {
            return Err(ProviderError::SizeIncreaseNotPositive);
        }

        let size = self.resource.replicas();
        let desired = size.saturating_add(delta);
        if desired > self.max_size() {
            return Err(ProviderError::SizeIncreaseTooLarge {
                desired,
                max: self.max_size(),
            });
        }

        info!(group = %self.id(), from = size, to = desired, "increasing node group size");
        self.resource.set_size(desired)
    }

    fn decrease_target_size(&mut self, delta: i32) -> ProviderResult<()> {
        if delta >= 0 {
            return Err(ProviderError::SizeDecreaseNotNegative);
        }

        let size = self.target_size()?;
        let existing = self.nodes()?.len();
        let desired = size.saturating_add(delta);
        if i64::from(desired) < existing as i64 {
            return Err(ProviderError::WouldDeleteExistingNodes {
                target: size,
                delta,
                existing,
            });
        }

        info!(group = %self.id(), from = size, to = desired, "decreasing node group target size");
        self.resource.set_size(desired)
    }

    fn delete_nodes(&mut self, nodes: &[Node]) -> ProviderResult<()> {
        let names: Vec<String> = nodes.iter().map(|n| n.metadata.name.clone()).collect();
        let marked = self.resource.delete_nodes(&names)?;
        debug!(group = %self.id(), count = marked.len(), "nodes marked for deletion");
        Ok(())
    }

    fn nodes(&self) -> ProviderResult<Vec<String>> {
        Ok(self.resource.nodes())
    }

    fn template_node_info(&self) -> ProviderResult<Node> {
        Err(ProviderError::NotImplemented)
    }

    fn exist(&self) -> bool {
        true
    }

    fn create(&self) -> ProviderResult<Box<dyn NodeGroup>> {
        Err(ProviderError::AlreadyExists)
    }

    fn delete(&self) -> ProviderResult<()> {
        Err(ProviderError::NotImplemented)
    }

    fn autoprovisioned(&self) -> bool {
        false
    }
}
