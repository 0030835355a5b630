//! Reading and rewriting the value at a path: an array of object keys,
//! array indices and `{"start", "end"}` slice objects.

use crate::error::EvalError;
use crate::value::{self, describe, type_name};
use serde_json::{Map, Value};
use std::cmp::Ordering;

type Result<T> = std::result::Result<T, EvalError>;

/// Value at `path`, or null once the walk reaches a null.
pub(crate) fn get(root: &Value, path: &[Value]) -> Result<Value> {
    let mut current = root.clone();
    for key in path {
        if current.is_null() {
            return Ok(Value::Null);
        }
        current = match key {
            Value::Object(bounds) => value::slice(&current, bounds.get("start"), bounds.get("end"))?,
            key => value::index(&current, key)?,
        };
    }
    Ok(current)
}

/// Replace the value at `path`, creating objects and null-padded arrays on
/// the way down.
pub(crate) fn set(root: Value, path: &[Value], replacement: Value) -> Result<Value> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(replacement);
    };
    match (root, key) {
        (Value::Object(mut map), Value::String(name)) => {
            let child = map.remove(name).unwrap_or(Value::Null);
            map.insert(name.clone(), set(child, rest, replacement)?);
            Ok(Value::Object(map))
        }
        (Value::Null, Value::String(name)) => {
            let mut map = Map::new();
            map.insert(name.clone(), set(Value::Null, rest, replacement)?);
            Ok(Value::Object(map))
        }
        (root @ (Value::Array(_) | Value::Null), Value::Number(_)) => {
            let mut items = into_array(root);
            let slot = slot(items.len(), key)?;
            if slot >= items.len() {
                items.resize(slot + 1, Value::Null);
            }
            let child = std::mem::take(&mut items[slot]);
            items[slot] = set(child, rest, replacement)?;
            Ok(Value::Array(items))
        }
        (root @ (Value::Array(_) | Value::Null), Value::Object(bounds)) => {
            let mut items = into_array(root);
            let (start, end) =
                value::slice_bounds(items.len(), bounds.get("start"), bounds.get("end"))?;
            let current = Value::Array(items[start..end].to_vec());
            let Value::Array(spliced) = set(current, rest, replacement)? else {
                return Err(EvalError::type_error(
                    "A slice of an array can only be assigned another array",
                ));
            };
            items.splice(start..end, spliced);
            Ok(Value::Array(items))
        }
        (root, key) => Err(cannot_index(&root, key)),
    }
}

/// Delete every path, deepest and rightmost first so earlier deletions never
/// shift the targets of later ones.
pub(crate) fn delete_all(mut root: Value, mut targets: Vec<Vec<Value>>) -> Result<Value> {
    targets.sort_by(|a, b| compare_paths(a, b));
    targets.dedup_by(|a, b| compare_paths(a, b) == Ordering::Equal);
    for target in targets.iter().rev() {
        root = delete(root, target)?;
    }
    Ok(root)
}

fn compare_paths(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = value::compare(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn delete(root: Value, path: &[Value]) -> Result<Value> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(Value::Null);
    };
    match (root, key) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Object(mut map), Value::String(name)) => {
            if rest.is_empty() {
                map.remove(name);
            } else if let Some(child) = map.remove(name) {
                map.insert(name.clone(), delete(child, rest)?);
            }
            Ok(Value::Object(map))
        }
        (Value::Array(mut items), Value::Number(_)) => {
            let slot = slot(items.len(), key)?;
            if slot < items.len() {
                if rest.is_empty() {
                    items.remove(slot);
                } else {
                    let child = std::mem::take(&mut items[slot]);
                    items[slot] = delete(child, rest)?;
                }
            }
            Ok(Value::Array(items))
        }
        (Value::Array(mut items), Value::Object(bounds)) => {
            let (start, end) =
                value::slice_bounds(items.len(), bounds.get("start"), bounds.get("end"))?;
            if rest.is_empty() {
                items.drain(start..end);
            } else {
                let Value::Array(kept) = delete(Value::Array(items[start..end].to_vec()), rest)?
                else {
                    return Err(EvalError::type_error("slice deletion must leave an array"));
                };
                items.splice(start..end, kept);
            }
            Ok(Value::Array(items))
        }
        (root, key) => Err(EvalError::type_error(format!(
            "Cannot delete field at {} index of {}",
            type_name(key),
            type_name(&root)
        ))),
    }
}

fn into_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Array position for `key`, counting negative indices from the end.
fn slot(len: usize, key: &Value) -> Result<usize> {
    let i = value::as_f64(key).unwrap_or(0.0).floor() as i64;
    let i = if i < 0 { len as i64 + i } else { i };
    if i < 0 {
        return Err(EvalError::type_error("Out of bounds negative array index"));
    }
    Ok(i as usize)
}

fn cannot_index(root: &Value, key: &Value) -> EvalError {
    match key {
        Value::String(name) => EvalError::type_error(format!(
            "Cannot index {} with \"{name}\"",
            type_name(root)
        )),
        other => EvalError::type_error(format!(
            "Cannot update field at {} of {}",
            describe(other),
            type_name(root)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn path(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            _ => panic!("path must be an array"),
        }
    }

    #[test]
    fn get_stops_at_null() {
        let root = json!({"a": {"b": [10, 20]}});
        assert_eq!(get(&root, &path(json!(["a", "b", -1]))).unwrap(), json!(20));
        assert_eq!(get(&root, &path(json!(["x", "y", 0]))).unwrap(), json!(null));
        assert!(get(&json!({"a": 1}), &path(json!(["a", "b"]))).is_err());
    }

    #[test]
    fn set_builds_missing_structure() {
        assert_eq!(
            set(Value::Null, &path(json!(["a", 2])), json!(1)).unwrap(),
            json!({"a": [null, null, 1]})
        );
        assert_eq!(
            set(json!([1, 2, 3]), &path(json!([-1])), json!(9)).unwrap(),
            json!([1, 2, 9])
        );
        assert_eq!(
            set(json!([1]), &path(json!([-2])), json!(0))
                .unwrap_err()
                .to_string(),
            "Out of bounds negative array index"
        );
    }

    #[test]
    fn set_through_a_slice_splices() {
        assert_eq!(
            set(
                json!([1, 2, 3, 4]),
                &path(json!([{"start": 1, "end": 3}])),
                json!(["x"])
            )
            .unwrap(),
            json!([1, "x", 4])
        );
    }

    #[test]
    fn delete_all_is_order_independent() {
        let root = json!({"a": [0, 1, 2, 3], "b": 1});
        let targets = vec![
            path(json!(["a", 1])),
            path(json!(["a", 3])),
            path(json!(["b"])),
            path(json!(["a", 1])),
        ];
        assert_eq!(delete_all(root, targets).unwrap(), json!({"a": [0, 2]}));
        assert_eq!(
            delete_all(json!([1, 2, 3]), vec![path(json!([{"start": 0, "end": 2}]))]).unwrap(),
            json!([3])
        );
    }
}
