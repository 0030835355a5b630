//! Regex matching and codepoint-level string builtins. Offsets and lengths
//! reported to filters count Unicode codepoints, not bytes.

use crate::error::EvalError;
use crate::value::{self, as_f64, describe};
use regex::{Captures, Regex, RegexBuilder};
use serde_json::{json, Map, Value};

type Result<T> = std::result::Result<T, EvalError>;

/// Match-time behavior selected by modifier flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Modifiers {
    /// `g`: every match instead of the first
    pub global: bool,
    /// `n`: ignore empty matches
    pub skip_empty: bool,
}

impl Modifiers {
    /// Validate a flag string; flags that only affect compilation are accepted
    /// and ignored here.
    pub(crate) fn parse(flags: &str) -> std::result::Result<Self, String> {
        let mut modifiers = Self::default();
        for flag in flags.chars() {
            match flag {
                'g' => modifiers.global = true,
                'n' => modifiers.skip_empty = true,
                // `l` (longest match) has no leftmost-first equivalent
                'i' | 'x' | 's' | 'p' | 'l' => {}
                _ => return Err(format!("{flags} is not a valid modifier string")),
            }
        }
        Ok(modifiers)
    }
}

/// Build a pattern with jq-style modifier flags.
pub(crate) fn compile_regex(pattern: &str, flags: &str) -> std::result::Result<(Regex, Modifiers), String> {
    let modifiers = Modifiers::parse(flags)?;
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .ignore_whitespace(flags.contains('x'))
        .dot_matches_new_line(flags.contains('s') || flags.contains('p'))
        .build()
        .map(|re| (re, modifiers))
        .map_err(|err| err.to_string())
}

/// Captures for each match jq would report, honoring `global` and `skip_empty`.
pub(crate) fn matches<'t>(re: &Regex, text: &'t str, modifiers: Modifiers) -> Vec<Captures<'t>> {
    let found = re
        .captures_iter(text)
        .filter(|caps| !(modifiers.skip_empty && caps.get(0).is_some_and(|m| m.as_str().is_empty())));
    if modifiers.global {
        found.collect()
    } else {
        found.take(1).collect()
    }
}

fn codepoints(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

/// `{offset, length, string, captures}` for one match.
pub(crate) fn match_object(re: &Regex, text: &str, caps: &Captures<'_>) -> Value {
    let Some(whole) = caps.get(0) else {
        return Value::Null;
    };
    let captures: Vec<Value> = re
        .capture_names()
        .enumerate()
        .skip(1)
        .map(|(i, name)| {
            let name = name.map_or(Value::Null, |n| Value::String(n.to_string()));
            match caps.get(i) {
                Some(m) => json!({
                    "offset": codepoints(text, m.start()),
                    "length": m.as_str().chars().count(),
                    "string": m.as_str(),
                    "name": name,
                }),
                None => json!({
                    "offset": -1,
                    "length": 0,
                    "string": null,
                    "name": name,
                }),
            }
        })
        .collect();
    json!({
        "offset": codepoints(text, whole.start()),
        "length": whole.as_str().chars().count(),
        "string": whole.as_str(),
        "captures": captures,
    })
}

/// Named groups of one match; unmatched groups map to null.
pub(crate) fn captures_object(re: &Regex, caps: &Captures<'_>) -> Value {
    let mut map = Map::new();
    for name in re.capture_names().flatten() {
        let captured = caps
            .name(name)
            .map_or(Value::Null, |m| Value::String(m.as_str().to_string()));
        map.insert(name.to_string(), captured);
    }
    Value::Object(map)
}

/// What `scan` emits per match: the match itself, or its groups when the
/// pattern has any.
pub(crate) fn scan_item(caps: &Captures<'_>) -> Value {
    if caps.len() == 1 {
        return caps
            .get(0)
            .map_or(Value::Null, |m| Value::String(m.as_str().to_string()));
    }
    Value::Array(
        caps.iter()
            .skip(1)
            .map(|m| m.map_or(Value::Null, |m| Value::String(m.as_str().to_string())))
            .collect(),
    )
}

/// Pieces of `text` between the matches.
pub(crate) fn split_on(re: &Regex, text: &str, modifiers: Modifiers) -> Vec<Value> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in matches(re, text, modifiers) {
        let Some(whole) = caps.get(0) else { continue };
        pieces.push(Value::String(text[last..whole.start()].to_string()));
        last = whole.end();
    }
    pieces.push(Value::String(text[last..].to_string()));
    pieces
}

pub(crate) fn explode(input: &Value) -> Result<Value> {
    let Value::String(text) = input else {
        return Err(EvalError::type_error(format!(
            "{} cannot be exploded, as it is not a string",
            describe(input)
        )));
    };
    Ok(Value::Array(text.chars().map(|c| Value::from(u32::from(c))).collect()))
}

pub(crate) fn implode(input: &Value) -> Result<Value> {
    let Value::Array(points) = input else {
        return Err(EvalError::type_error(format!(
            "{} cannot be imploded, as it is not an array",
            describe(input)
        )));
    };
    let mut text = String::with_capacity(points.len());
    for point in points {
        let c = as_f64(point)
            .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX))
            .and_then(|n| char::from_u32(n as u32))
            .ok_or_else(|| {
                EvalError::type_error(format!("{} is not a valid codepoint", describe(point)))
            })?;
        text.push(c);
    }
    Ok(Value::String(text))
}

/// Start offsets of every occurrence of `needle`, overlapping ones included.
pub(crate) fn indices(input: &Value, needle: &Value) -> Result<Value> {
    match (input, needle) {
        (Value::String(text), Value::String(needle)) => {
            if needle.is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            let mut found = Vec::new();
            let mut chars = 0;
            for (byte, _) in text.char_indices() {
                if text[byte..].starts_with(needle.as_str()) {
                    found.push(Value::from(chars));
                }
                chars += 1;
            }
            Ok(Value::Array(found))
        }
        (Value::Array(items), Value::Array(sub)) => Ok(value::subarray_positions(items, sub)),
        (Value::Array(items), scalar) => {
            Ok(value::subarray_positions(items, std::slice::from_ref(scalar)))
        }
        _ => value::index(input, needle),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trim {
    Both,
    Start,
    End,
}

pub(crate) fn trim(input: &Value, side: Trim) -> Result<Value> {
    let Value::String(text) = input else {
        return Err(EvalError::type_error(format!(
            "{} cannot be trimmed, as it is not a string",
            describe(input)
        )));
    };
    let trimmed = match side {
        Trim::Both => text.trim(),
        Trim::Start => text.trim_start(),
        Trim::End => text.trim_end(),
    };
    Ok(Value::String(trimmed.to_string()))
}
