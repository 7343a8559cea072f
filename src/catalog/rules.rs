//! Building blocks for table-driven parameter rules.
//!
//! Rule functions registered on a contract only run once every required
//! parameter is present and well-typed, so helpers here skip absent keys.

use serde_json::Value;

use crate::dsl::{NodeDeclaration, ValidationError, ValidationErrorKind};

pub fn param_error(node: &NodeDeclaration, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::error(ValidationErrorKind::Parameter, "E203", message)
        .at_node(&node.id)
        .at_field(format!("params.{}", field))
}

pub fn cross_param_error(
    node: &NodeDeclaration,
    field: &str,
    message: impl Into<String>,
) -> ValidationError {
    ValidationError::error(ValidationErrorKind::Parameter, "E204", message)
        .at_node(&node.id)
        .at_field(format!("params.{}", field))
}

/// Value must be one of `allowed` (case-sensitive).
pub fn one_of(node: &NodeDeclaration, key: &str, allowed: &[&str]) -> Option<ValidationError> {
    let value = node.param_str(key)?;
    if allowed.contains(&value) {
        return None;
    }
    Some(param_error(
        node,
        key,
        format!(
            "Invalid value '{}' for '{}', expected one of: {}",
            value,
            key,
            allowed.join(", ")
        ),
    ))
}

/// Integer within `[min, max]`.
pub fn int_in_range(node: &NodeDeclaration, key: &str, min: i64, max: i64) -> Option<ValidationError> {
    let value = node.param_i64(key)?;
    if (min..=max).contains(&value) {
        return None;
    }
    Some(param_error(
        node,
        key,
        format!("'{}' must be between {} and {}, got {}", key, min, max, value),
    ))
}

pub fn int_at_least(node: &NodeDeclaration, key: &str, min: i64) -> Option<ValidationError> {
    let value = node.param_i64(key)?;
    if value >= min {
        return None;
    }
    Some(param_error(
        node,
        key,
        format!("'{}' must be at least {}, got {}", key, min, value),
    ))
}

pub fn positive_number(node: &NodeDeclaration, key: &str) -> Option<ValidationError> {
    let value = node.param_f64(key)?;
    if value > 0.0 {
        return None;
    }
    Some(param_error(
        node,
        key,
        format!("'{}' must be positive, got {}", key, value),
    ))
}

pub fn non_negative_number(node: &NodeDeclaration, key: &str) -> Option<ValidationError> {
    let value = node.param_f64(key)?;
    if value >= 0.0 {
        return None;
    }
    Some(param_error(
        node,
        key,
        format!("'{}' must not be negative, got {}", key, value),
    ))
}

/// Number in the open interval `(0, 1)`, or `(0, 1]` when `inclusive_max`.
pub fn fraction(node: &NodeDeclaration, key: &str, inclusive_max: bool) -> Option<ValidationError> {
    let value = node.param_f64(key)?;
    let ok = value > 0.0 && if inclusive_max { value <= 1.0 } else { value < 1.0 };
    if ok {
        return None;
    }
    let bound = if inclusive_max { "(0, 1]" } else { "(0, 1)" };
    Some(param_error(
        node,
        key,
        format!("'{}' must be in {}, got {}", key, bound, value),
    ))
}

/// Array must not be empty.
pub fn non_empty_array(node: &NodeDeclaration, key: &str) -> Option<ValidationError> {
    match node.param(key)? {
        Value::Array(items) if items.is_empty() => Some(param_error(
            node,
            key,
            format!("'{}' must not be empty", key),
        )),
        _ => None,
    }
}

/// Every element of an array must be a string.
pub fn string_array(node: &NodeDeclaration, key: &str) -> Vec<ValidationError> {
    let Some(Value::Array(items)) = node.param(key) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.is_string())
        .map(|(i, _)| {
            param_error(
                node,
                &format!("{}[{}]", key, i),
                format!("'{}' entries must be strings", key),
            )
        })
        .collect()
}

/// Collect the `Some` results of a list of single checks.
pub fn collect<I>(checks: I) -> Vec<ValidationError>
where
    I: IntoIterator<Item = Option<ValidationError>>,
{
    checks.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node() -> NodeDeclaration {
        NodeDeclaration::new("n", "T")
            .with_param("period", json!(0))
            .with_param("indicator", json!("WMA"))
            .with_param("size", json!(1.0))
            .with_param("cols", json!(["a", 2]))
    }

    #[test]
    fn test_helpers_skip_absent_keys() {
        let n = NodeDeclaration::new("n", "T");
        assert!(one_of(&n, "x", &["a"]).is_none());
        assert!(int_in_range(&n, "x", 1, 2).is_none());
        assert!(string_array(&n, "x").is_empty());
    }

    #[test]
    fn test_range_and_enum_violations() {
        let n = node();
        let e = int_in_range(&n, "period", 1, 1000).unwrap();
        assert_eq!(e.field_path.as_deref(), Some("params.period"));
        assert_eq!(e.kind, ValidationErrorKind::Parameter);
        let e = one_of(&n, "indicator", &["SMA", "EMA"]).unwrap();
        assert!(e.message.contains("SMA, EMA"));
    }

    #[test]
    fn test_fraction_bounds() {
        let n = node();
        assert!(fraction(&n, "size", true).is_none());
        assert!(fraction(&n, "size", false).is_some());
    }

    #[test]
    fn test_string_array_points_at_bad_entry() {
        let errs = string_array(&node(), "cols");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].field_path.as_deref(), Some("params.cols[1]"));
    }
}
