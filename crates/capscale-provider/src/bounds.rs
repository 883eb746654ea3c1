//! Scaling bounds carried as annotations on replica controllers.

use std::collections::BTreeMap;

use thiserror::Error;

/// Minimum node group size annotation.
pub const NODE_GROUP_MIN_SIZE_ANNOTATION_KEY: &str =
    "cluster.k8s.io/cluster-api-autoscaler-node-group-min-size";

/// Maximum node group size annotation.
pub const NODE_GROUP_MAX_SIZE_ANNOTATION_KEY: &str =
    "cluster.k8s.io/cluster-api-autoscaler-node-group-max-size";

/// Set on a Machine to ask the machine controller to remove it.
pub const MACHINE_DELETE_ANNOTATION_KEY: &str = "sigs.k8s.io/cluster-api-delete-machine";

/// A bounds annotation that is present but unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundsError {
    #[error("expected an unsigned integer for {key:?}, got {value:?}")]
    NotAnInteger { key: String, value: String },

    #[error("value {value:?} for {key:?} is out of range")]
    OutOfRange { key: String, value: String },
}

/// Parse `(min, max)` from annotations.
///
/// A missing key counts as 0. A present value must be a base-10 unsigned
/// integer that fits an `i32`; negative numbers are rejected.
pub fn parse_scaling_bounds(
    annotations: &BTreeMap<String, String>,
) -> Result<(i32, i32), BoundsError> {
    let min = parse_bound(annotations, NODE_GROUP_MIN_SIZE_ANNOTATION_KEY)?;
    let max = parse_bound(annotations, NODE_GROUP_MAX_SIZE_ANNOTATION_KEY)?;
    Ok((min, max))
}

/// A resource can be scaled only if `max > min`.
pub fn is_eligible(min: i32, max: i32) -> bool {
    max > min
}

fn parse_bound(annotations: &BTreeMap<String, String>, key: &str) -> Result<i32, BoundsError> {
    let Some(value) = annotations.get(key) else {
        return Ok(0);
    };

    let not_an_integer = || BoundsError::NotAnInteger {
        key: key.to_string(),
        value: value.clone(),
    };
    // Digits only: `u32::from_str` would also take a leading '+'.
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(not_an_integer());
    }
    let parsed: u32 = value.parse().map_err(|_| not_an_integer())?;

    i32::try_from(parsed).map_err(|_| BoundsError::OutOfRange {
        key: key.to_string(),
        value: value.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(min: Option<&str>, max: Option<&str>) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(min) = min {
            map.insert(NODE_GROUP_MIN_SIZE_ANNOTATION_KEY.to_string(), min.to_string());
        }
        if let Some(max) = max {
            map.insert(NODE_GROUP_MAX_SIZE_ANNOTATION_KEY.to_string(), max.to_string());
        }
        map
    }

    #[test]
    fn missing_annotations_are_zero() {
        assert_eq!(parse_scaling_bounds(&BTreeMap::new()), Ok((0, 0)));
        assert_eq!(parse_scaling_bounds(&annotations(Some("3"), None)), Ok((3, 0)));
        assert_eq!(parse_scaling_bounds(&annotations(None, Some("3"))), Ok((0, 3)));
    }

    #[test]
    fn valid_bounds() {
        assert_eq!(
            parse_scaling_bounds(&annotations(Some("1"), Some("10"))),
            Ok((1, 10))
        );
        assert_eq!(
            parse_scaling_bounds(&annotations(Some("0"), Some("0"))),
            Ok((0, 0))
        );
    }

    #[test]
    fn negative_value_is_rejected() {
        let err = parse_scaling_bounds(&annotations(Some("-1"), Some("1"))).unwrap_err();
        assert_eq!(
            err,
            BoundsError::NotAnInteger {
                key: NODE_GROUP_MIN_SIZE_ANNOTATION_KEY.to_string(),
                value: "-1".to_string(),
            }
        );
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        for bad in ["", "ten", "1.5", " 3", "0x10", "+3", "-0"] {
            assert!(
                parse_scaling_bounds(&annotations(Some("1"), Some(bad))).is_err(),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn explicit_plus_sign_is_rejected() {
        let err = parse_scaling_bounds(&annotations(Some("+1"), Some("+10"))).unwrap_err();
        assert_eq!(
            err,
            BoundsError::NotAnInteger {
                key: NODE_GROUP_MIN_SIZE_ANNOTATION_KEY.to_string(),
                value: "+1".to_string(),
            }
        );
    }

    #[test]
    fn value_beyond_i32_is_out_of_range() {
        let err = parse_scaling_bounds(&annotations(Some("0"), Some("3000000000"))).unwrap_err();
        assert!(matches!(err, BoundsError::OutOfRange { .. }));
    }

    #[test]
    fn inverted_bounds_parse_but_are_ineligible() {
        let (min, max) = parse_scaling_bounds(&annotations(Some("5"), Some("2"))).unwrap();
        assert!(!is_eligible(min, max));
    }

    #[test]
    fn eligibility_is_strict() {
        assert!(is_eligible(1, 10));
        assert!(is_eligible(0, 1));
        assert!(!is_eligible(1, 1));
        assert!(!is_eligible(0, 0));
    }
}
