//! capscale-provider — cluster-api node groups for a capacity-planning engine.
//!
//! Maps the cluster's Machine topology onto resizable node groups:
//!
//! ```text
//! Node ──annotation──▶ Machine ──owner──▶ MachineSet ──owner──▶ MachineDeployment
//!                                              └──────── root controller ────────┘
//! ```
//!
//! A root controller (the MachineDeployment when one owns the MachineSet,
//! otherwise the MachineSet) becomes a node group when it carries min/max
//! size annotations with `max > min`. All resolution reads the informer
//! cache; only resizes and node deletions touch the store.

pub mod bounds;
pub mod controller;
pub mod error;
pub mod nodegroup;
pub mod provider;
pub mod scalable;

#[cfg(test)]
pub(crate) mod testing;

pub use bounds::{
    BoundsError, MACHINE_DELETE_ANNOTATION_KEY, NODE_GROUP_MAX_SIZE_ANNOTATION_KEY,
    NODE_GROUP_MIN_SIZE_ANNOTATION_KEY, parse_scaling_bounds,
};
pub use controller::{MACHINE_ANNOTATION_KEY, MachineController};
pub use error::{ProviderError, ProviderResult};
pub use nodegroup::{MachineNodeGroup, NodeGroup};
pub use provider::{ClusterApiProvider, GPU_LABEL, PROVIDER_NAME, ResourceLimiter};
pub use scalable::{ScalableResource, ScalableTarget};
