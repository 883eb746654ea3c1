//! Provider error types.

use thiserror::Error;

use capscale_state::StateError;

use crate::bounds::BoundsError;

/// Errors surfaced to the capacity-planning engine.
///
/// Missing objects during resolution are not errors; they come back as
/// `None`. Everything here is either a misconfiguration, a rejected request,
/// or a store failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A min/max annotation failed to parse.
    #[error("error validating min/max annotations on {id}: {source}")]
    InvalidBounds {
        id: String,
        #[source]
        source: BoundsError,
    },

    #[error("size increase must be positive")]
    SizeIncreaseNotPositive,

    #[error("size increase too large - desired:{desired} max:{max}")]
    SizeIncreaseTooLarge { desired: i32, max: i32 },

    #[error("size decrease must be negative")]
    SizeDecreaseNotNegative,

    #[error(
        "attempt to delete existing nodes targetSize:{target} delta:{delta} existingNodes: {existing}"
    )]
    WouldDeleteExistingNodes {
        target: i32,
        delta: i32,
        existing: usize,
    },

    #[error("invalid replica count {0}")]
    InvalidSize(i32),

    /// The node could not be mapped to a Machine.
    #[error("cannot map node {0:?} to a machine")]
    UnresolvableNode(String),

    #[error("node {node:?} does not belong to node group {group}")]
    NodeNotInGroup { node: String, group: String },

    #[error("not implemented")]
    NotImplemented,

    #[error("node group already exists")]
    AlreadyExists,

    /// Store failure, passed through as-is. Stale writes show up as
    /// `StateError::Conflict`.
    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl ProviderError {
    /// True when a mutation lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProviderError::State(e) if e.is_conflict())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use capscale_state::{MachineSet, ObjectMeta, StateStore};

    #[test]
    fn stale_write_is_a_conflict() {
        let store = StateStore::open_in_memory().unwrap();
        let ms = MachineSet {
            metadata: ObjectMeta::new("default", "workers"),
            ..Default::default()
        };
        let created = store.create(&ms).unwrap();
        store.update(&created).unwrap();

        let err: ProviderError = store.update(&created).unwrap_err().into();
        assert!(err.is_conflict());
        assert!(matches!(
            err,
            ProviderError::State(StateError::Conflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn bounds_error_names_the_resource() {
        let err = ProviderError::InvalidBounds {
            id: "default/workers".to_string(),
            source: BoundsError::NotAnInteger {
                key: "min".to_string(),
                value: "-1".to_string(),
            },
        };
        assert!(err.to_string().contains("default/workers"));
        assert!(!err.is_conflict());
    }
}
