//! Value semantics shared by the evaluator and builtins: truthiness, the total
//! ordering used by comparisons and sorting, arithmetic, and indexing.

use crate::error::EvalError;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

type Result<T> = std::result::Result<T, EvalError>;

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Integral results come back as JSON integers so `1 + 1` prints `2`, not `2.0`.
/// Infinities saturate to the largest finite double; NaN has no JSON form and
/// becomes null.
pub(crate) fn number(n: f64) -> Value {
    let n = if n.is_infinite() { f64::MAX.copysign(n) } else { n };
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// JSON text of `value`, cut short for error messages.
pub(crate) fn preview(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 11 {
        let cut: String = text.chars().take(10).collect();
        format!("{cut}...")
    } else {
        text
    }
}

/// Short rendering used inside error messages.
pub(crate) fn describe(value: &Value) -> String {
    format!("{} ({})", type_name(value), preview(value))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order: null < false < true < numbers < strings < arrays < objects.
/// Objects compare by their sorted key sets first, then value by value.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut xk: Vec<&String> = x.keys().collect();
            let mut yk: Vec<&String> = y.keys().collect();
            xk.sort();
            yk.sort();
            let keys = xk.cmp(&yk);
            if keys != Ordering::Equal {
                return keys;
            }
            for key in xk {
                let ord = compare(&x[key], &y[key]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

pub(crate) fn equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

pub(crate) fn add(a: &Value, b: &Value) -> Result<Value> {
    Ok(match (a, b) {
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        (Value::Number(_), Value::Number(_)) => number(num(a) + num(b)),
        (Value::String(x), Value::String(y)) => Value::String(format!("{x}{y}")),
        (Value::Array(x), Value::Array(y)) => {
            Value::Array(x.iter().chain(y.iter()).cloned().collect())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut merged = x.clone();
            for (k, v) in y {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => return Err(binary_error(a, b, "cannot be added")),
    })
}

pub(crate) fn subtract(a: &Value, b: &Value) -> Result<Value> {
    Ok(match (a, b) {
        (Value::Number(_), Value::Number(_)) => number(num(a) - num(b)),
        (Value::Array(x), Value::Array(y)) => Value::Array(
            x.iter()
                .filter(|item| !y.iter().any(|r| equal(item, r)))
                .cloned()
                .collect(),
        ),
        _ => return Err(binary_error(a, b, "cannot be subtracted")),
    })
}

pub(crate) fn multiply(a: &Value, b: &Value) -> Result<Value> {
    Ok(match (a, b) {
        (Value::Number(_), Value::Number(_)) => number(num(a) * num(b)),
        (Value::String(s), Value::Number(_)) | (Value::Number(_), Value::String(s)) => {
            let times = if matches!(a, Value::Number(_)) { num(a) } else { num(b) };
            if times <= 0.0 {
                Value::Null
            } else {
                Value::String(s.repeat(times.ceil() as usize))
            }
        }
        (Value::Object(x), Value::Object(y)) => Value::Object(deep_merge(x, y)),
        _ => return Err(binary_error(a, b, "cannot be multiplied")),
    })
}

pub(crate) fn divide(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            if num(b) == 0.0 {
                return Err(binary_error(a, b, "cannot be divided because the divisor is zero"));
            }
            Ok(number(num(a) / num(b)))
        }
        (Value::String(x), Value::String(sep)) => Ok(split_str(x, sep)),
        _ => Err(binary_error(a, b, "cannot be divided")),
    }
}

pub(crate) fn remainder(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let divisor = num(b) as i64;
            if divisor == 0 {
                return Err(binary_error(
                    a,
                    b,
                    "cannot be divided because the divisor is zero",
                ));
            }
            let dividend = num(a) as i64;
            Ok(Value::Number(Number::from(
                dividend.wrapping_rem(divisor.wrapping_abs()),
            )))
        }
        _ => Err(binary_error(a, b, "cannot be divided")),
    }
}

pub(crate) fn split_str(text: &str, sep: &str) -> Value {
    if text.is_empty() {
        return Value::Array(Vec::new());
    }
    let parts: Vec<Value> = if sep.is_empty() {
        text.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        text.split(sep).map(|s| Value::String(s.to_string())).collect()
    };
    Value::Array(parts)
}

fn deep_merge(x: &Map<String, Value>, y: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = x.clone();
    for (k, v) in y {
        let next = match (merged.get(k), v) {
            (Some(Value::Object(l)), Value::Object(r)) => Value::Object(deep_merge(l, r)),
            _ => v.clone(),
        };
        merged.insert(k.clone(), next);
    }
    merged
}

fn num(value: &Value) -> f64 {
    as_f64(value).unwrap_or(0.0)
}

fn binary_error(a: &Value, b: &Value, what: &str) -> EvalError {
    EvalError::type_error(format!("{} and {} {what}", describe(a), describe(b)))
}

/// `target[index]` for a single target/index pair.
pub(crate) fn index(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::Null, Value::String(_) | Value::Number(_) | Value::Null) => Ok(Value::Null),
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Array(items), Value::Array(needle)) => Ok(subarray_positions(items, needle)),
        (Value::Array(items), Value::Number(_)) => {
            let i = num(index).floor() as i64;
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            if i < 0 || i >= len {
                Ok(Value::Null)
            } else {
                Ok(items[i as usize].clone())
            }
        }
        (_, Value::String(key)) => Err(EvalError::type_error(format!(
            "Cannot index {} with \"{key}\"",
            type_name(target)
        ))),
        _ => Err(EvalError::type_error(format!(
            "Cannot index {} with {}",
            type_name(target),
            type_name(index)
        ))),
    }
}

fn clamp_bound(bound: Option<&Value>, len: usize, default: usize, round_up: bool) -> Result<usize> {
    let Some(raw) = bound else {
        return Ok(default);
    };
    let n = match raw {
        Value::Null => return Ok(default),
        Value::Number(_) => num(raw),
        other => {
            return Err(EvalError::type_error(format!(
                "Start and end indices of an array slice must be numbers, not {}",
                type_name(other)
            )))
        }
    };
    let n = if round_up { n.ceil() } else { n.floor() };
    let len_f = len as f64;
    let n = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
    Ok(n as usize)
}

/// Resolved `[start, end)` of a slice over `len` elements.
pub(crate) fn slice_bounds(len: usize, from: Option<&Value>, to: Option<&Value>) -> Result<(usize, usize)> {
    let start = clamp_bound(from, len, 0, false)?;
    let end = clamp_bound(to, len, len, true)?;
    Ok((start, end.max(start)))
}

/// `target[from:to]` on arrays and strings (strings slice by character).
pub(crate) fn slice(target: &Value, from: Option<&Value>, to: Option<&Value>) -> Result<Value> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let start = clamp_bound(from, items.len(), 0, false)?;
            let end = clamp_bound(to, items.len(), items.len(), true)?;
            Ok(Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let start = clamp_bound(from, chars.len(), 0, false)?;
            let end = clamp_bound(to, chars.len(), chars.len(), true)?;
            Ok(Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            }))
        }
        other => Err(EvalError::type_error(format!(
            "Cannot index {} with object",
            type_name(other)
        ))),
    }
}

/// Start positions of every occurrence of `needle` inside `items`. An empty
/// needle matches nowhere.
pub(crate) fn subarray_positions(items: &[Value], needle: &[Value]) -> Value {
    if needle.is_empty() || needle.len() > items.len() {
        return Value::Array(Vec::new());
    }
    Value::Array(
        items
            .windows(needle.len())
            .enumerate()
            .filter(|(_, window)| window.iter().zip(needle).all(|(a, b)| equal(a, b)))
            .map(|(i, _)| Value::from(i))
            .collect(),
    )
}

pub(crate) fn cannot_iterate(value: &Value) -> EvalError {
    EvalError::type_error(format!(
        "Cannot iterate over {}",
        if matches!(value, Value::Null) {
            "null".to_string()
        } else {
            describe(value)
        }
    ))
}

/// `.[]` on one value.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => Ok(map.values().cloned().collect()),
        other => Err(cannot_iterate(other)),
    }
}

/// `.[]` consuming its input.
pub(crate) fn into_items(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(_, v)| v).collect()),
        other => Err(cannot_iterate(&other)),
    }
}

/// Rendering used by `tostring`, `join` and string interpolation.
pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
