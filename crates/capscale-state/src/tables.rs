//! redb table definitions for the capscale object store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized objects).
//! Namespaced kinds are keyed by `{namespace}/{name}`, Nodes by `{name}`.

use redb::TableDefinition;

use crate::types::ObjectKind;

/// Nodes keyed by `{name}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Machines keyed by `{namespace}/{name}`.
pub const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");

/// MachineSets keyed by `{namespace}/{name}`.
pub const MACHINE_SETS: TableDefinition<&str, &[u8]> = TableDefinition::new("machine_sets");

/// MachineDeployments keyed by `{namespace}/{name}`.
pub const MACHINE_DEPLOYMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("machine_deployments");

/// Store bookkeeping (uid sequence).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key of the uid sequence counter in [`META`].
pub const UID_SEQUENCE_KEY: &str = "uid_sequence";

/// Table holding objects of the given kind.
pub fn table_for(kind: ObjectKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        ObjectKind::Node => NODES,
        ObjectKind::Machine => MACHINES,
        ObjectKind::MachineSet => MACHINE_SETS,
        ObjectKind::MachineDeployment => MACHINE_DEPLOYMENTS,
    }
}
