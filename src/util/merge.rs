//! Deep merge of configuration trees
//!
//! Precedence rules for a key present on both sides:
//! - mapping + mapping → merged recursively
//! - either side null → the override's value
//! - same kind → the override's value (sequences are replaced, never concatenated)
//! - different kinds → `TypeConflict`
//!
//! Inputs are borrowed and never mutated.

use serde_yaml::{Mapping, Value};

use crate::error::{Result, WeirError};

/// Merge `patch` over `base`, returning a new tree.
///
/// A null `base` behaves as an empty mapping, so `merge(Null, {a: 1}) == {a: 1}`.
pub fn merge(base: &Value, patch: &Value) -> Result<Value> {
    let base = as_root_mapping(base, "base")?;
    let patch = as_root_mapping(patch, "patch")?;
    merge_mappings(base.as_ref(), patch.as_ref(), "").map(Value::Mapping)
}

fn as_root_mapping<'a>(value: &'a Value, side: &str) -> Result<std::borrow::Cow<'a, Mapping>> {
    match value {
        Value::Mapping(map) => Ok(std::borrow::Cow::Borrowed(map)),
        Value::Null => Ok(std::borrow::Cow::Owned(Mapping::new())),
        other => Err(WeirError::InvalidPatch {
            source_name: side.to_string(),
            reason: format!("expected a mapping, found {}", kind_of(other)),
        }),
    }
}

fn merge_mappings(base: &Mapping, patch: &Mapping, prefix: &str) -> Result<Mapping> {
    let mut merged = base.clone();

    for (key, incoming) in patch {
        let path = join_key(prefix, key);
        let next = match (base.get(key), incoming) {
            (None, _) => incoming.clone(),
            (Some(Value::Mapping(current)), Value::Mapping(nested)) => {
                Value::Mapping(merge_mappings(current, nested, &path)?)
            }
            (Some(current), _) if current.is_null() || incoming.is_null() => incoming.clone(),
            (Some(current), _) if kind_of(current) == kind_of(incoming) => incoming.clone(),
            (Some(current), _) => {
                return Err(WeirError::TypeConflict {
                    key: path,
                    base: kind_of(current),
                    patch: kind_of(incoming),
                })
            }
        };
        merged.insert(key.clone(), next);
    }

    Ok(merged)
}

/// Human-readable kind name used in conflict errors.
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

fn join_key(prefix: &str, key: &Value) -> String {
    let key = match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| "?".to_string()),
    };
    if prefix.is_empty() {
        key
    } else {
        format!("{prefix}.{key}")
    }
}
