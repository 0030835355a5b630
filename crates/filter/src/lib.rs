//! # sessionq filter
//!
//! A jq-compatible filter language for querying line-delimited JSON records.
//!
//! Expressions are compiled once into an immutable [`Filter`] that can be
//! shared across threads and evaluated against any number of records:
//!
//! ```rust
//! use sessionq_filter::Filter;
//! use serde_json::json;
//!
//! let filter = Filter::compile(r#"select(.type == "user") | .message.content"#).unwrap();
//! let outputs: Vec<_> = filter
//!     .run(&json!({"type": "user", "message": {"content": "hi"}}))
//!     .into_iter()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(outputs, vec![json!("hi")]);
//! ```
//!
//! The language is jq's: paths, iteration and slices, `?`, pipes and comma,
//! string interpolation and `@format` strings, arithmetic and comparisons,
//! `and`/`or`/`//`, `if`, `try`/`catch`, `reduce`, `foreach`, `label`/`break`,
//! `as` bindings with destructuring, `def` with closure and `$value`
//! parameters, path updates (`=`, `|=`, `+=`, ...), `$ENV`, `$__loc__` and
//! the standard builtin library including regexes, dates and path functions.
//!
//! Outputs are produced lazily: [`Filter::for_each`] stops the generator as
//! soon as the sink breaks, so `first(range(1e12))` costs one step.
//!
//! Not supported: modules (`import`/`include`), reading further records
//! with `input`/`inputs`, `halt`, the SQL-style builtins and
//! arbitrary-precision number literals.

mod ast;
mod builtins;
mod error;
mod eval;
mod format;
mod lexer;
mod parser;
mod paths;
mod prelude;
mod strings;
mod time;
mod value;

pub use error::{EvalError, FilterError, Result};

use ast::Ast;
use serde_json::Value;
use std::ops::ControlFlow;

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    ast: Ast,
}

impl Filter {
    /// Compile `text`. Empty or whitespace-only text is the identity filter `.`.
    pub fn compile(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::identity());
        }
        let ast = parser::parse(trimmed)?;
        Ok(Self {
            source: trimmed.to_string(),
            ast,
        })
    }

    pub fn identity() -> Self {
        Self {
            source: ".".to_string(),
            ast: Ast::Identity,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.ast, Ast::Identity)
    }

    /// Evaluate against one input. Produces zero or more values; a runtime
    /// error ends the sequence as its final element.
    pub fn run(&self, input: &Value) -> Vec<std::result::Result<Value, EvalError>> {
        let mut results = Vec::new();
        let outcome = self.for_each(input, |value| {
            results.push(Ok(value));
            ControlFlow::Continue(())
        });
        if let Err(err) = outcome {
            results.push(Err(err));
        }
        results
    }

    /// Feed each output to `sink` as it is produced. Evaluation stops when the
    /// sink breaks or the filter raises an error.
    pub fn for_each(
        &self,
        input: &Value,
        mut sink: impl FnMut(Value) -> ControlFlow<()>,
    ) -> std::result::Result<(), EvalError> {
        eval::run(&self.ast, input, &|| false, &mut sink)
    }

    /// [`Filter::for_each`] that also polls `interrupted` during long
    /// computations and fails with [`EvalError::Interrupted`] once it fires.
    pub fn for_each_until(
        &self,
        input: &Value,
        interrupted: &dyn Fn() -> bool,
        mut sink: impl FnMut(Value) -> ControlFlow<()>,
    ) -> std::result::Result<(), EvalError> {
        eval::run(&self.ast, input, interrupted, &mut sink)
    }
}

/// Rewrite integral floating-point numbers as integers, recursively, so
/// `1.0` read from a record prints as `1` the way filter arithmetic does.
pub fn canonicalize(value: &mut Value) {
    let replacement = match value {
        Value::Number(n) if n.is_f64() => n.as_f64().map(value::number),
        Value::Array(items) => {
            items.iter_mut().for_each(canonicalize);
            None
        }
        Value::Object(map) => {
            map.values_mut().for_each(canonicalize);
            None
        }
        _ => None,
    };
    if let Some(replacement) = replacement {
        *value = replacement;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn filter_is_shareable() {
        assert_send_sync::<Filter>();
    }

    #[test]
    fn blank_text_is_identity() {
        for text in ["", "   ", "\n\t", "."] {
            let filter = Filter::compile(text).expect("compile");
            assert!(filter.is_identity(), "{text:?}");
        }
        assert!(!Filter::compile(".a").expect("compile").is_identity());
    }

    #[test]
    fn source_is_kept_trimmed() {
        let filter = Filter::compile("  .type  ").expect("compile");
        assert_eq!(filter.source(), ".type");
    }

    #[test]
    fn canonicalize_turns_integral_floats_into_integers() {
        let mut record: Value = serde_json::from_str(r#"{"a":1.0,"b":[2.50,3e2],"c":-0.0,"d":1e300}"#)
            .expect("parse");
        canonicalize(&mut record);
        assert_eq!(record.to_string(), r#"{"a":1,"b":[2.5,300],"c":0,"d":1e300}"#);
    }

    #[test]
    fn for_each_stops_when_the_sink_breaks() {
        let filter = Filter::compile("range(1000000000000)").expect("compile");
        let mut seen = Vec::new();
        filter
            .for_each(&Value::Null, |value| {
                seen.push(value);
                ControlFlow::Break(())
            })
            .expect("run");
        assert_eq!(seen, vec![json!(0)]);
    }

    #[test]
    fn for_each_until_reports_interruption() {
        let filter = Filter::compile("[range(1000000000000)] | length").expect("compile");
        let err = filter
            .for_each_until(&Value::Null, &|| true, |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert_eq!(err, EvalError::Interrupted);
    }
}
