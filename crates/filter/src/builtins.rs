//! Natively implemented builtins. Everything expressible in the filter
//! language itself lives in the prelude instead.

use crate::ast::{Ast, Call};
use crate::error::EvalError;
use crate::eval::{caught, invalid_path, Cx, Env, Flow, PathSink, Sink, Unwind};
use crate::strings::{self, Modifiers, Trim};
use crate::value::{self, as_f64, compare, describe, equal, number, truthy, type_name};
use crate::{paths, time};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::OnceLock;

type Result<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Empty,
    Error0,
    Error1,
    Not,
    Length,
    Utf8ByteLength,
    Keys,
    KeysUnsorted,
    Has,
    In,
    Contains,
    Inside,
    Select,
    Map,
    MapValues,
    ToEntries,
    FromEntries,
    WithEntries,
    Add,
    Any0,
    All0,
    Range1,
    Range2,
    Range3,
    First0,
    Last0,
    First1,
    Last1,
    Limit,
    Nth,
    IsEmpty,
    Until,
    While,
    Repeat,
    Recurse0,
    Recurse1,
    Recurse2,
    Sort,
    SortBy,
    GroupBy,
    Unique,
    UniqueBy,
    Min,
    Max,
    MinBy,
    MaxBy,
    Reverse,
    Flatten0,
    Flatten1,
    Type,
    ToString,
    ToNumber,
    ToJson,
    FromJson,
    AsciiDowncase,
    AsciiUpcase,
    LtrimStr,
    RtrimStr,
    StartsWith,
    EndsWith,
    Split1,
    Join,
    Explode,
    Implode,
    Indices,
    Trim(Trim),
    Test1,
    Test2,
    Match1,
    Match2,
    Capture1,
    Capture2,
    Scan1,
    Scan2,
    Split2,
    Splits1,
    Splits2,
    Sub2,
    Sub3,
    Gsub2,
    Gsub3,
    Math(UnaryMath),
    Math2(BinaryMath),
    Abs,
    Infinite,
    Nan,
    IsInfinite,
    IsNan,
    IsNormal,
    Values,
    Nulls,
    Booleans,
    Numbers,
    Strings,
    Arrays,
    Objects,
    Iterables,
    Scalars,
    Path,
    GetPath,
    SetPath,
    DelPaths,
    Now,
    Mktime,
    Gmtime,
    Localtime,
    Strftime,
    StrfLocaltime,
    Strptime,
    FromDateIso8601,
    Builtins,
    InputFilename,
    Input,
    Inputs,
    Debug,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryMath {
    Floor,
    Ceil,
    Round,
    Trunc,
    Sqrt,
    Cbrt,
    Fabs,
    Exp,
    Exp2,
    Exp10,
    Expm1,
    Log,
    Log2,
    Log10,
    Log1p,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
}

impl UnaryMath {
    fn apply(self, n: f64) -> f64 {
        match self {
            Self::Floor => n.floor(),
            Self::Ceil => n.ceil(),
            Self::Round => n.round(),
            Self::Trunc => n.trunc(),
            Self::Sqrt => n.sqrt(),
            Self::Cbrt => n.cbrt(),
            Self::Fabs => n.abs(),
            Self::Exp => n.exp(),
            Self::Exp2 => n.exp2(),
            Self::Exp10 => 10f64.powf(n),
            Self::Expm1 => n.exp_m1(),
            Self::Log => n.ln(),
            Self::Log2 => n.log2(),
            Self::Log10 => n.log10(),
            Self::Log1p => n.ln_1p(),
            Self::Sin => n.sin(),
            Self::Cos => n.cos(),
            Self::Tan => n.tan(),
            Self::Asin => n.asin(),
            Self::Acos => n.acos(),
            Self::Atan => n.atan(),
            Self::Sinh => n.sinh(),
            Self::Cosh => n.cosh(),
            Self::Tanh => n.tanh(),
            Self::Asinh => n.asinh(),
            Self::Acosh => n.acosh(),
            Self::Atanh => n.atanh(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryMath {
    Pow,
    Atan2,
    Fmin,
    Fmax,
    Fmod,
    Ldexp,
}

impl BinaryMath {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Pow => a.powf(b),
            Self::Atan2 => a.atan2(b),
            Self::Fmin => a.min(b),
            Self::Fmax => a.max(b),
            Self::Fmod => a % b,
            Self::Ldexp => a * b.exp2(),
        }
    }
}

/// Name and arity of every native builtin.
const TABLE: &[(&str, usize, Builtin)] = {
    use Builtin::*;
    &[
        ("empty", 0, Empty),
        ("error", 0, Error0),
        ("error", 1, Error1),
        ("not", 0, Not),
        ("length", 0, Length),
        ("utf8bytelength", 0, Utf8ByteLength),
        ("keys", 0, Keys),
        ("keys_unsorted", 0, KeysUnsorted),
        ("has", 1, Has),
        ("in", 1, In),
        ("contains", 1, Contains),
        ("inside", 1, Inside),
        ("select", 1, Select),
        ("map", 1, Map),
        ("map_values", 1, MapValues),
        ("to_entries", 0, ToEntries),
        ("from_entries", 0, FromEntries),
        ("with_entries", 1, WithEntries),
        ("add", 0, Add),
        ("any", 0, Any0),
        ("all", 0, All0),
        ("range", 1, Range1),
        ("range", 2, Range2),
        ("range", 3, Range3),
        ("first", 0, First0),
        ("last", 0, Last0),
        ("first", 1, First1),
        ("last", 1, Last1),
        ("limit", 2, Limit),
        ("nth", 1, Nth),
        ("isempty", 1, IsEmpty),
        ("until", 2, Until),
        ("while", 2, While),
        ("repeat", 1, Repeat),
        ("recurse", 0, Recurse0),
        ("recurse", 1, Recurse1),
        ("recurse", 2, Recurse2),
        ("sort", 0, Sort),
        ("sort_by", 1, SortBy),
        ("group_by", 1, GroupBy),
        ("unique", 0, Unique),
        ("unique_by", 1, UniqueBy),
        ("min", 0, Min),
        ("max", 0, Max),
        ("min_by", 1, MinBy),
        ("max_by", 1, MaxBy),
        ("reverse", 0, Reverse),
        ("flatten", 0, Flatten0),
        ("flatten", 1, Flatten1),
        ("type", 0, Type),
        ("tostring", 0, ToString),
        ("tonumber", 0, ToNumber),
        ("tojson", 0, ToJson),
        ("fromjson", 0, FromJson),
        ("ascii_downcase", 0, AsciiDowncase),
        ("ascii_upcase", 0, AsciiUpcase),
        ("ltrimstr", 1, LtrimStr),
        ("rtrimstr", 1, RtrimStr),
        ("startswith", 1, StartsWith),
        ("endswith", 1, EndsWith),
        ("split", 1, Split1),
        ("join", 1, Join),
        ("explode", 0, Explode),
        ("implode", 0, Implode),
        ("indices", 1, Indices),
        ("trim", 0, Trim(strings::Trim::Both)),
        ("ltrim", 0, Trim(strings::Trim::Start)),
        ("rtrim", 0, Trim(strings::Trim::End)),
        ("test", 1, Test1),
        ("test", 2, Test2),
        ("match", 1, Match1),
        ("match", 2, Match2),
        ("capture", 1, Capture1),
        ("capture", 2, Capture2),
        ("scan", 1, Scan1),
        ("scan", 2, Scan2),
        ("split", 2, Split2),
        ("splits", 1, Splits1),
        ("splits", 2, Splits2),
        ("sub", 2, Sub2),
        ("sub", 3, Sub3),
        ("gsub", 2, Gsub2),
        ("gsub", 3, Gsub3),
        ("floor", 0, Math(UnaryMath::Floor)),
        ("ceil", 0, Math(UnaryMath::Ceil)),
        ("round", 0, Math(UnaryMath::Round)),
        ("trunc", 0, Math(UnaryMath::Trunc)),
        ("sqrt", 0, Math(UnaryMath::Sqrt)),
        ("cbrt", 0, Math(UnaryMath::Cbrt)),
        ("fabs", 0, Math(UnaryMath::Fabs)),
        ("exp", 0, Math(UnaryMath::Exp)),
        ("exp2", 0, Math(UnaryMath::Exp2)),
        ("exp10", 0, Math(UnaryMath::Exp10)),
        ("expm1", 0, Math(UnaryMath::Expm1)),
        ("log", 0, Math(UnaryMath::Log)),
        ("log2", 0, Math(UnaryMath::Log2)),
        ("log10", 0, Math(UnaryMath::Log10)),
        ("log1p", 0, Math(UnaryMath::Log1p)),
        ("sin", 0, Math(UnaryMath::Sin)),
        ("cos", 0, Math(UnaryMath::Cos)),
        ("tan", 0, Math(UnaryMath::Tan)),
        ("asin", 0, Math(UnaryMath::Asin)),
        ("acos", 0, Math(UnaryMath::Acos)),
        ("atan", 0, Math(UnaryMath::Atan)),
        ("sinh", 0, Math(UnaryMath::Sinh)),
        ("cosh", 0, Math(UnaryMath::Cosh)),
        ("tanh", 0, Math(UnaryMath::Tanh)),
        ("asinh", 0, Math(UnaryMath::Asinh)),
        ("acosh", 0, Math(UnaryMath::Acosh)),
        ("atanh", 0, Math(UnaryMath::Atanh)),
        ("pow", 2, Math2(BinaryMath::Pow)),
        ("atan2", 2, Math2(BinaryMath::Atan2)),
        ("fmin", 2, Math2(BinaryMath::Fmin)),
        ("fmax", 2, Math2(BinaryMath::Fmax)),
        ("fmod", 2, Math2(BinaryMath::Fmod)),
        ("ldexp", 2, Math2(BinaryMath::Ldexp)),
        ("abs", 0, Abs),
        ("infinite", 0, Infinite),
        ("nan", 0, Nan),
        ("isinfinite", 0, IsInfinite),
        ("isnan", 0, IsNan),
        ("isnormal", 0, IsNormal),
        ("values", 0, Values),
        ("nulls", 0, Nulls),
        ("booleans", 0, Booleans),
        ("numbers", 0, Numbers),
        ("strings", 0, Strings),
        ("arrays", 0, Arrays),
        ("objects", 0, Objects),
        ("iterables", 0, Iterables),
        ("scalars", 0, Scalars),
        ("path", 1, Path),
        ("getpath", 1, GetPath),
        ("setpath", 2, SetPath),
        ("delpaths", 1, DelPaths),
        ("now", 0, Now),
        ("mktime", 0, Mktime),
        ("gmtime", 0, Gmtime),
        ("localtime", 0, Localtime),
        ("strftime", 1, Strftime),
        ("strflocaltime", 1, StrfLocaltime),
        ("strptime", 1, Strptime),
        ("fromdateiso8601", 0, FromDateIso8601),
        ("builtins", 0, Builtins),
        ("input_filename", 0, InputFilename),
        ("input", 0, Input),
        ("inputs", 0, Inputs),
        ("debug", 0, Debug),
        ("stderr", 0, Stderr),
    ]
};

impl Builtin {
    pub(crate) fn resolve(name: &str, arity: usize) -> Option<Self> {
        TABLE
            .iter()
            .find(|(n, a, _)| *n == name && *a == arity)
            .map(|(_, _, builtin)| *builtin)
    }

    /// Position of the regex flags argument, for builtins that take a pattern.
    pub(crate) fn regex_flags_arg(self) -> Option<Option<usize>> {
        use Builtin::*;
        match self {
            Test1 | Match1 | Capture1 | Scan1 | Splits1 | Sub2 | Gsub2 => Some(None),
            Test2 | Match2 | Capture2 | Scan2 | Splits2 | Split2 => Some(Some(1)),
            Sub3 | Gsub3 => Some(Some(2)),
            _ => None,
        }
    }

    fn always_global(self) -> bool {
        use Builtin::*;
        matches!(
            self,
            Gsub2 | Gsub3 | Scan1 | Scan2 | Split2 | Splits1 | Splits2
        )
    }
}

/// Builtins with a path-mode implementation, usable on the left of `|=`
/// and inside `path(..)`.
pub(crate) fn has_paths(builtin: Builtin) -> bool {
    use Builtin::*;
    matches!(
        builtin,
        Empty
            | Select
            | Recurse0
            | Recurse1
            | Recurse2
            | First0
            | Last0
            | First1
            | Last1
            | Limit
            | GetPath
            | Values
            | Nulls
            | Booleans
            | Numbers
            | Strings
            | Arrays
            | Objects
            | Iterables
            | Scalars
    )
}

/// `$ENV`, captured once per process.
pub(crate) fn env_object() -> Value {
    static ENV: OnceLock<Value> = OnceLock::new();
    ENV.get_or_init(|| {
        Value::Object(
            std::env::vars_os()
                .map(|(key, value)| {
                    (
                        key.to_string_lossy().into_owned(),
                        Value::String(value.to_string_lossy().into_owned()),
                    )
                })
                .collect(),
        )
    })
    .clone()
}

fn array_input<'v>(input: &'v Value, what: &str) -> Result<&'v Vec<Value>> {
    match input {
        Value::Array(items) => Ok(items),
        other => Err(EvalError::type_error(format!(
            "{} cannot be {what}, as it is not an array",
            describe(other)
        ))),
    }
}

fn string_input<'v>(input: &'v Value, what: &str) -> Result<&'v str> {
    match input {
        Value::String(text) => Ok(text),
        other => Err(EvalError::type_error(format!(
            "{} cannot be {what}, as it is not a string",
            describe(other)
        ))),
    }
}

fn number_input(input: &Value, name: &str) -> Result<f64> {
    as_f64(input).ok_or_else(|| {
        EvalError::type_error(format!("{} number required for {name}", describe(input)))
    })
}

pub(crate) fn call<'a>(
    cx: &Cx<'_>,
    call: &'a Call,
    input: &Value,
    env: Env<'a>,
    out: &mut Sink<'_>,
) -> Flow {
    use Builtin::*;
    let args = &call.args;
    match call.builtin {
        Empty => Ok(()),
        Error0 => Err(EvalError::User(input.clone()).into()),
        Error1 => cx.eval(&args[0], input, env, &mut |msg| Err(EvalError::User(msg).into())),
        Not => out(Value::Bool(!truthy(input))),
        Length => out(length(input)?),
        Utf8ByteLength => out(Value::from(string_input(input, "measured")?.len())),
        Keys => out(keys(input, true)?),
        KeysUnsorted => out(keys(input, false)?),
        Values | Nulls | Booleans | Numbers | Strings | Arrays | Objects | Iterables
        | Scalars => {
            if type_filter(call.builtin, input) {
                out(input.clone())
            } else {
                Ok(())
            }
        }
        Has => cx.eval(&args[0], input, env, &mut |key| out(has(input, &key)?)),
        In => cx.eval(&args[0], input, env, &mut |container| out(has(&container, input)?)),
        Contains => cx.eval(&args[0], input, env, &mut |b| {
            out(Value::Bool(contains(input, &b)?))
        }),
        Inside => cx.eval(&args[0], input, env, &mut |a| {
            out(Value::Bool(contains(&a, input)?))
        }),
        Select => cx.eval(&args[0], input, env, &mut |cond| {
            if truthy(&cond) {
                out(input.clone())
            } else {
                Ok(())
            }
        }),
        Map => out(Value::Array(map_items(cx, value::iterate(input)?, &args[0], env)?)),
        MapValues => out(map_values(cx, input, &args[0], env)?),
        ToEntries => out(to_entries(input)?),
        FromEntries => out(from_entries(input)?),
        WithEntries => {
            let entries = value::into_items(to_entries(input)?)?;
            let mapped = map_items(cx, entries, &args[0], env)?;
            out(from_entries(&Value::Array(mapped))?)
        }
        Add => out(value::iterate(input)?
            .iter()
            .try_fold(Value::Null, |acc, item| value::add(&acc, item))?),
        Any0 => out(Value::Bool(value::iterate(input)?.iter().any(truthy))),
        All0 => out(Value::Bool(value::iterate(input)?.iter().all(truthy))),
        Range1 => cx.eval(&args[0], input, env, &mut |upto| {
            count(cx, &Value::from(0), &upto, &Value::from(1), &mut *out)
        }),
        Range2 => cx.eval(&args[0], input, env, &mut |from| {
            cx.eval(&args[1], input, env, &mut |upto| {
                count(cx, &from, &upto, &Value::from(1), &mut *out)
            })
        }),
        Range3 => cx.eval(&args[0], input, env, &mut |from| {
            cx.eval(&args[1], input, env, &mut |upto| {
                cx.eval(&args[2], input, env, &mut |by| count(cx, &from, &upto, &by, &mut *out))
            })
        }),
        First0 => out(value::index(input, &Value::from(0))?),
        Last0 => out(value::index(input, &Value::from(-1))?),
        Nth => cx.eval(&args[0], input, env, &mut |n| out(value::index(input, &n)?)),
        First1 => take(cx, &args[0], input, env, 1, out),
        Last1 => {
            let mut last = None;
            cx.eval(&args[0], input, env, &mut |value| {
                last = Some(value);
                Ok(())
            })?;
            out(last.unwrap_or(Value::Null))
        }
        Limit => cx.eval(&args[0], input, env, &mut |n| match limit_count(&n)? {
            Some(n) => take(cx, &args[1], input, env, n, &mut *out),
            None => cx.eval(&args[1], input, env, &mut *out),
        }),
        IsEmpty => {
            let id = cx.fresh_label();
            let mut any = false;
            let result = cx.eval(&args[0], input, env, &mut |_| {
                any = true;
                Err(Unwind::Break(id))
            });
            caught(result, id)?;
            out(Value::Bool(!any))
        }
        Until => unfold(cx, input.clone(), out, &mut |value| {
            let mut steps = Vec::new();
            for test in cx.collect(&args[0], &value, env)? {
                if truthy(&test) {
                    steps.push(Step::Emit(value.clone()));
                } else {
                    steps.extend(cx.collect(&args[1], &value, env)?.into_iter().map(Step::Expand));
                }
            }
            Ok(steps)
        }),
        While => unfold(cx, input.clone(), out, &mut |value| {
            let mut steps = Vec::new();
            for test in cx.collect(&args[0], &value, env)? {
                if truthy(&test) {
                    steps.push(Step::Emit(value.clone()));
                    steps.extend(cx.collect(&args[1], &value, env)?.into_iter().map(Step::Expand));
                }
            }
            Ok(steps)
        }),
        Repeat | Recurse1 => unfold(cx, input.clone(), out, &mut |value| {
            let next = cx.collect(&args[0], &value, env)?;
            let mut steps = vec![Step::Emit(value)];
            steps.extend(next.into_iter().map(Step::Expand));
            Ok(steps)
        }),
        Recurse2 => unfold(cx, input.clone(), out, &mut |value| {
            let mut steps = Vec::new();
            for next in cx.collect(&args[0], &value, env)? {
                for keep in cx.collect(&args[1], &next, env)? {
                    if truthy(&keep) {
                        steps.push(Step::Expand(next.clone()));
                    }
                }
            }
            steps.insert(0, Step::Emit(value));
            Ok(steps)
        }),
        Recurse0 => cx.recurse_all(input, out),
        Sort => {
            let mut sorted = array_input(input, "sorted")?.clone();
            sorted.sort_by(compare);
            out(Value::Array(sorted))
        }
        SortBy => {
            let pairs = keyed(cx, input, &args[0], env, "sorted")?;
            out(Value::Array(pairs.into_iter().map(|(_, item)| item).collect()))
        }
        GroupBy => {
            let pairs = keyed(cx, input, &args[0], env, "grouped")?;
            out(Value::Array(group_runs(pairs).into_iter().map(Value::Array).collect()))
        }
        Unique => {
            let mut sorted = array_input(input, "sorted")?.clone();
            sorted.sort_by(compare);
            sorted.dedup_by(|a, b| equal(a, b));
            out(Value::Array(sorted))
        }
        UniqueBy => {
            let pairs = keyed(cx, input, &args[0], env, "grouped")?;
            out(Value::Array(
                group_runs(pairs)
                    .into_iter()
                    .filter_map(|group| group.into_iter().next())
                    .collect(),
            ))
        }
        Min => {
            let items = array_input(input, "compared")?;
            out(items.iter().min_by(|a, b| compare(a, b)).cloned().unwrap_or(Value::Null))
        }
        Max => {
            let items = array_input(input, "compared")?;
            out(items.iter().max_by(|a, b| compare(a, b)).cloned().unwrap_or(Value::Null))
        }
        MinBy => out(extreme_by(cx, input, &args[0], env, Ordering::Less)?),
        MaxBy => out(extreme_by(cx, input, &args[0], env, Ordering::Greater)?),
        Reverse => out(match input {
            Value::Null => Value::Array(Vec::new()),
            Value::String(text) => Value::String(text.chars().rev().collect()),
            Value::Array(items) => Value::Array(items.iter().rev().cloned().collect()),
            other => {
                return Err(EvalError::type_error(format!("Cannot reverse {}", describe(other))).into())
            }
        }),
        Flatten0 => out(flatten(input, f64::INFINITY)?),
        Flatten1 => cx.eval(&args[0], input, env, &mut |depth| {
            let depth = as_f64(&depth)
                .ok_or_else(|| EvalError::type_error("flatten depth must be a number"))?;
            if depth < 0.0 {
                return Err(EvalError::type_error("flatten depth must not be negative").into());
            }
            out(flatten(input, depth)?)
        }),
        Type => out(Value::String(type_name(input).to_string())),
        ToString => out(Value::String(value::to_text(input))),
        ToNumber => out(to_number(input)?),
        ToJson => out(Value::String(input.to_string())),
        FromJson => {
            let text = string_input(input, "parsed")?;
            let parsed: Value = serde_json::from_str(text).map_err(|err| {
                EvalError::type_error(format!("{err} (while parsing '{text}')"))
            })?;
            out(parsed)
        }
        AsciiDowncase => out(Value::String(
            string_input(input, "lowercased")?.to_ascii_lowercase(),
        )),
        AsciiUpcase => out(Value::String(
            string_input(input, "uppercased")?.to_ascii_uppercase(),
        )),
        LtrimStr => cx.eval(&args[0], input, env, &mut |prefix| {
            out(match (input, &prefix) {
                (Value::String(text), Value::String(prefix)) => text
                    .strip_prefix(prefix.as_str())
                    .map_or_else(|| input.clone(), |rest| Value::String(rest.to_string())),
                _ => input.clone(),
            })
        }),
        RtrimStr => cx.eval(&args[0], input, env, &mut |suffix| {
            out(match (input, &suffix) {
                (Value::String(text), Value::String(suffix)) => text
                    .strip_suffix(suffix.as_str())
                    .map_or_else(|| input.clone(), |rest| Value::String(rest.to_string())),
                _ => input.clone(),
            })
        }),
        StartsWith => cx.eval(&args[0], input, env, &mut |prefix| match (input, &prefix) {
            (Value::String(text), Value::String(prefix)) => {
                out(Value::Bool(text.starts_with(prefix.as_str())))
            }
            _ => Err(EvalError::type_error("startswith() requires string inputs").into()),
        }),
        EndsWith => cx.eval(&args[0], input, env, &mut |suffix| match (input, &suffix) {
            (Value::String(text), Value::String(suffix)) => {
                out(Value::Bool(text.ends_with(suffix.as_str())))
            }
            _ => Err(EvalError::type_error("endswith() requires string inputs").into()),
        }),
        Split1 => cx.eval(&args[0], input, env, &mut |sep| match (input, &sep) {
            (Value::String(text), Value::String(sep)) => out(value::split_str(text, sep)),
            _ => Err(EvalError::type_error("split input and separator must be strings").into()),
        }),
        Join => cx.eval(&args[0], input, env, &mut |sep| out(join(input, &sep)?)),
        Explode => out(strings::explode(input)?),
        Implode => out(strings::implode(input)?),
        Indices => cx.eval(&args[0], input, env, &mut |needle| {
            out(strings::indices(input, &needle)?)
        }),
        Trim(side) => out(strings::trim(input, side)?),
        Test1 | Test2 => with_regexes(cx, call, input, env, &mut |re: &Regex, text: &str, _: Modifiers| {
            out(Value::Bool(re.is_match(text)))
        }),
        Match1 | Match2 => with_regexes(cx, call, input, env, &mut |re: &Regex, text: &str, modifiers: Modifiers| {
            for caps in strings::matches(re, text, modifiers) {
                out(strings::match_object(re, text, &caps))?;
            }
            Ok(())
        }),
        Capture1 | Capture2 => with_regexes(cx, call, input, env, &mut |re: &Regex, text: &str, modifiers: Modifiers| {
            for caps in strings::matches(re, text, modifiers) {
                out(strings::captures_object(re, &caps))?;
            }
            Ok(())
        }),
        Scan1 | Scan2 => with_regexes(cx, call, input, env, &mut |re: &Regex, text: &str, modifiers: Modifiers| {
            for caps in strings::matches(re, text, modifiers) {
                out(strings::scan_item(&caps))?;
            }
            Ok(())
        }),
        Split2 => with_regexes(cx, call, input, env, &mut |re: &Regex, text: &str, modifiers: Modifiers| {
            out(Value::Array(strings::split_on(re, text, modifiers)))
        }),
        Splits1 | Splits2 => with_regexes(cx, call, input, env, &mut |re: &Regex, text: &str, modifiers: Modifiers| {
            for piece in strings::split_on(re, text, modifiers) {
                out(piece)?;
            }
            Ok(())
        }),
        Sub2 | Sub3 | Gsub2 | Gsub3 => {
            with_regexes(cx, call, input, env, &mut |re: &Regex, text: &str, modifiers: Modifiers| {
                let found = strings::matches(re, text, modifiers);
                let substitution = Substitution {
                    re,
                    text,
                    replacement: &args[1],
                    env,
                };
                substitution.run(cx, &found, String::new(), 0, &mut *out)
            })
        }
        Math(op) => out(number(op.apply(number_input(input, &format!("{op:?}").to_lowercase())?))),
        Math2(op) => cx.eval(&args[0], input, env, &mut |a| {
            cx.eval(&args[1], input, env, &mut |b| {
                let name = format!("{op:?}").to_lowercase();
                out(number(op.apply(number_input(&a, &name)?, number_input(&b, &name)?)))
            })
        }),
        Abs => match input {
            Value::Number(_) => out(number(as_f64(input).unwrap_or(0.0).abs())),
            other => Err(EvalError::type_error(format!(
                "{} has no absolute value",
                describe(other)
            ))
            .into()),
        },
        Infinite => out(number(f64::INFINITY)),
        Nan => out(number(f64::NAN)),
        // NaN is stored as null and infinities as the largest finite double
        IsInfinite => match input {
            Value::Null => out(Value::Bool(false)),
            _ => out(Value::Bool(number_input(input, "isinfinite")?.abs() == f64::MAX)),
        },
        IsNan => match input {
            Value::Null => out(Value::Bool(true)),
            _ => {
                number_input(input, "isnan")?;
                out(Value::Bool(false))
            }
        },
        IsNormal => match input {
            Value::Null => out(Value::Bool(false)),
            _ => {
                let n = number_input(input, "isnormal")?;
                out(Value::Bool(n.is_normal() && n.abs() != f64::MAX))
            }
        },
        Path => cx.paths(&args[0], &[], input, env, &mut |at, _| out(Value::Array(at))),
        GetPath => cx.eval(&args[0], input, env, &mut |path| {
            out(paths::get(input, path_steps(&path)?)?)
        }),
        SetPath => cx.eval(&args[0], input, env, &mut |path| {
            let steps = path_steps(&path)?;
            cx.eval(&args[1], input, env, &mut |replacement| {
                out(paths::set(input.clone(), steps, replacement)?)
            })
        }),
        DelPaths => cx.eval(&args[0], input, env, &mut |list| {
            let Value::Array(list) = list else {
                return Err(EvalError::type_error("Paths must be specified as an array").into());
            };
            let targets = list
                .iter()
                .map(|path| path_steps(path).map(<[Value]>::to_vec))
                .collect::<Result<Vec<_>>>()?;
            out(paths::delete_all(input.clone(), targets)?)
        }),
        Now => out(time::now()),
        Mktime => out(time::mktime(input)?),
        Gmtime => out(time::gmtime(input)?),
        Localtime => out(time::localtime(input)?),
        Strftime => cx.eval(&args[0], input, env, &mut |format| {
            out(time::strftime(input, &format, false)?)
        }),
        StrfLocaltime => cx.eval(&args[0], input, env, &mut |format| {
            out(time::strftime(input, &format, true)?)
        }),
        Strptime => cx.eval(&args[0], input, env, &mut |format| {
            out(time::strptime(input, &format)?)
        }),
        FromDateIso8601 => out(time::from_iso8601(input)?),
        Builtins => {
            let natives = TABLE
                .iter()
                .map(|(name, arity, _)| format!("{name}/{arity}"));
            let defined = cx
                .prelude
                .iter()
                .map(|def| format!("{}/{}", def.name, def.params.len()));
            out(Value::Array(natives.chain(defined).map(Value::String).collect()))
        }
        // records are evaluated one at a time
        InputFilename => out(Value::Null),
        Input => Err(EvalError::type_error("No more inputs").into()),
        Inputs => Ok(()),
        Debug => {
            log::debug!("[\"DEBUG:\",{input}]");
            out(input.clone())
        }
        Stderr => {
            log::debug!("{input}");
            out(input.clone())
        }
    }
}

/// Path-mode counterpart of [`call`] for builtins that pass through or
/// select parts of their input.
pub(crate) fn call_paths<'a>(
    cx: &Cx<'_>,
    site: &'a Call,
    path: &[Value],
    current: &Value,
    env: Env<'a>,
    out: &mut PathSink<'_>,
) -> Flow {
    use Builtin::*;
    let args = &site.args;
    match site.builtin {
        Empty => Ok(()),
        Select => cx.eval(&args[0], current, env, &mut |cond| {
            if truthy(&cond) {
                out(path.to_vec(), current.clone())
            } else {
                Ok(())
            }
        }),
        Values | Nulls | Booleans | Numbers | Strings | Arrays | Objects | Iterables
        | Scalars => {
            if type_filter(site.builtin, current) {
                out(path.to_vec(), current.clone())
            } else {
                Ok(())
            }
        }
        Recurse0 => cx.recurse_paths(path, current, out),
        Recurse1 | Recurse2 => {
            let mut pending = vec![(path.to_vec(), current.clone())];
            while let Some((at, value)) = pending.pop() {
                cx.tick()?;
                let mut children = Vec::new();
                cx.paths(&args[0], &at, &value, env, &mut |next_path, next| match args.get(1) {
                    Some(cond) => cx.eval(cond, &next, env, &mut |keep| {
                        if truthy(&keep) {
                            children.push((next_path.clone(), next.clone()));
                        }
                        Ok(())
                    }),
                    None => {
                        children.push((next_path, next));
                        Ok(())
                    }
                })?;
                out(at, value)?;
                pending.extend(children.into_iter().rev());
            }
            Ok(())
        }
        First0 | Last0 => {
            let key = Value::from(if site.builtin == First0 { 0 } else { -1 });
            let found = value::index(current, &key)?;
            let mut at = path.to_vec();
            at.push(key);
            out(at, found)
        }
        First1 => take_paths(cx, &args[0], path, current, env, 1, out),
        Last1 => {
            let mut last = None;
            cx.paths(&args[0], path, current, env, &mut |at, value| {
                last = Some((at, value));
                Ok(())
            })?;
            match last {
                Some((at, value)) => out(at, value),
                None => Ok(()),
            }
        }
        Limit => cx.eval(&args[0], current, env, &mut |n| match limit_count(&n)? {
            Some(n) => take_paths(cx, &args[1], path, current, env, n, &mut *out),
            None => cx.paths(&args[1], path, current, env, &mut *out),
        }),
        GetPath => cx.eval(&args[0], current, env, &mut |steps| {
            let steps = path_steps(&steps)?;
            let found = paths::get(current, steps).unwrap_or(Value::Null);
            let mut at = path.to_vec();
            at.extend(steps.iter().cloned());
            out(at, found)
        }),
        _ => call(cx, site, current, env, &mut |value| Err(invalid_path(&value).into())),
    }
}

/// `None` means unbounded: a negative limit passes every output through.
fn limit_count(n: &Value) -> Result<Option<usize>> {
    let n = as_f64(n).ok_or_else(|| EvalError::type_error("Invalid limit: must be a number"))?;
    Ok((n >= 0.0).then(|| n.ceil() as usize))
}

/// First `n` outputs of `f`; the generator is abandoned once they are out.
fn take<'a>(cx: &Cx<'_>, f: &'a Ast, input: &Value, env: Env<'a>, n: usize, out: &mut Sink<'_>) -> Flow {
    if n == 0 {
        return Ok(());
    }
    let id = cx.fresh_label();
    let mut left = n;
    let result = cx.eval(f, input, env, &mut |value| {
        out(value)?;
        left -= 1;
        if left == 0 {
            Err(Unwind::Break(id))
        } else {
            Ok(())
        }
    });
    caught(result, id)
}

fn take_paths<'a>(
    cx: &Cx<'_>,
    f: &'a Ast,
    path: &[Value],
    current: &Value,
    env: Env<'a>,
    n: usize,
    out: &mut PathSink<'_>,
) -> Flow {
    if n == 0 {
        return Ok(());
    }
    let id = cx.fresh_label();
    let mut left = n;
    let result = cx.paths(f, path, current, env, &mut |at, value| {
        out(at, value)?;
        left -= 1;
        if left == 0 {
            Err(Unwind::Break(id))
        } else {
            Ok(())
        }
    });
    caught(result, id)
}

fn count(cx: &Cx<'_>, from: &Value, upto: &Value, by: &Value, out: &mut Sink<'_>) -> Flow {
    let (Some(from), Some(upto), Some(by)) = (as_f64(from), as_f64(upto), as_f64(by)) else {
        return Err(EvalError::type_error("Range bounds must be numeric").into());
    };
    let mut current = from;
    while (by > 0.0 && current < upto) || (by < 0.0 && current > upto) {
        cx.tick()?;
        out(number(current))?;
        current += by;
    }
    Ok(())
}

enum Step {
    Emit(Value),
    Expand(Value),
}

/// Depth-first driver for the recursive generators. `plan` replaces one
/// value with the steps it expands to.
fn unfold(
    cx: &Cx<'_>,
    start: Value,
    out: &mut Sink<'_>,
    plan: &mut dyn FnMut(Value) -> std::result::Result<Vec<Step>, Unwind>,
) -> Flow {
    let mut pending = vec![Step::Expand(start)];
    while let Some(step) = pending.pop() {
        cx.tick()?;
        match step {
            Step::Emit(value) => out(value)?,
            Step::Expand(value) => pending.extend(plan(value)?.into_iter().rev()),
        }
    }
    Ok(())
}

fn path_steps(path: &Value) -> Result<&[Value]> {
    match path {
        Value::Array(steps) => Ok(steps),
        _ => Err(EvalError::type_error("Path must be specified as an array")),
    }
}

fn type_filter(builtin: Builtin, input: &Value) -> bool {
    match builtin {
        Builtin::Values => !input.is_null(),
        Builtin::Nulls => input.is_null(),
        Builtin::Booleans => input.is_boolean(),
        Builtin::Numbers => input.is_number(),
        Builtin::Strings => input.is_string(),
        Builtin::Arrays => input.is_array(),
        Builtin::Objects => input.is_object(),
        Builtin::Iterables => input.is_array() || input.is_object(),
        Builtin::Scalars => !(input.is_array() || input.is_object()),
        _ => false,
    }
}

fn length(input: &Value) -> Result<Value> {
    Ok(match input {
        Value::Null => Value::from(0),
        Value::Bool(_) => {
            return Err(EvalError::type_error(format!(
                "{} has no length",
                describe(input)
            )))
        }
        Value::Number(_) => number(as_f64(input).unwrap_or(0.0).abs()),
        Value::String(text) => Value::from(text.chars().count()),
        Value::Array(items) => Value::from(items.len()),
        Value::Object(map) => Value::from(map.len()),
    })
}

fn keys(input: &Value, sorted: bool) -> Result<Value> {
    match input {
        Value::Object(map) => {
            let mut names: Vec<&String> = map.keys().collect();
            if sorted {
                names.sort();
            }
            Ok(Value::Array(
                names.into_iter().map(|k| Value::String(k.clone())).collect(),
            ))
        }
        Value::Array(items) => Ok(Value::Array((0..items.len()).map(Value::from).collect())),
        other => Err(EvalError::type_error(format!("{} has no keys", describe(other)))),
    }
}

fn has(container: &Value, key: &Value) -> Result<Value> {
    match (container, key) {
        (Value::Object(map), Value::String(name)) => Ok(Value::Bool(map.contains_key(name))),
        (Value::Array(items), Value::Number(_)) => {
            let i = as_f64(key).unwrap_or(-1.0);
            Ok(Value::Bool(i >= 0.0 && (i as usize) < items.len()))
        }
        _ => Err(EvalError::type_error(format!(
            "Cannot check whether {} has a {} key",
            type_name(container),
            type_name(key)
        ))),
    }
}

fn contains(a: &Value, b: &Value) -> Result<bool> {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            for (key, expected) in y {
                match x.get(key) {
                    Some(actual) if contains(actual, expected)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Array(x), Value::Array(y)) => {
            for expected in y {
                let mut found = false;
                for actual in x {
                    if contains(actual, expected)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::String(x), Value::String(y)) => Ok(x.contains(y.as_str())),
        _ if type_name(a) == type_name(b) => Ok(equal(a, b)),
        _ => Err(EvalError::type_error(format!(
            "{} and {} cannot have their containment checked",
            describe(a),
            describe(b)
        ))),
    }
}

fn map_items<'a>(
    cx: &Cx<'_>,
    items: Vec<Value>,
    f: &'a Ast,
    env: Env<'a>,
) -> std::result::Result<Vec<Value>, Unwind> {
    let mut mapped = Vec::with_capacity(items.len());
    for item in items {
        cx.eval(f, &item, env, &mut |value| {
            mapped.push(value);
            Ok(())
        })?;
    }
    Ok(mapped)
}

/// `.[] |= f`: the first output of `f` replaces each member, no output
/// removes it.
fn map_values<'a>(
    cx: &Cx<'_>,
    input: &Value,
    f: &'a Ast,
    env: Env<'a>,
) -> std::result::Result<Value, Unwind> {
    let targets: Vec<Vec<Value>> = match input {
        Value::Object(map) => map.keys().map(|k| vec![Value::String(k.clone())]).collect(),
        Value::Array(items) => (0..items.len()).map(|i| vec![Value::from(i)]).collect(),
        other => return Err(value::cannot_iterate(other).into()),
    };
    cx.update_paths(input.clone(), &targets, &mut |member| cx.first_output(f, &member, env))
}

fn entry(key: Value, value: Value) -> Value {
    let mut fields = Map::new();
    fields.insert("key".to_string(), key);
    fields.insert("value".to_string(), value);
    Value::Object(fields)
}

fn to_entries(input: &Value) -> Result<Value> {
    match input {
        Value::Object(map) => Ok(Value::Array(
            map.iter()
                .map(|(k, v)| entry(Value::String(k.clone()), v.clone()))
                .collect(),
        )),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| entry(Value::from(i), v.clone()))
                .collect(),
        )),
        other => Err(EvalError::type_error(format!("{} has no keys", describe(other)))),
    }
}

/// Entries may name their key `key`, `k`, `name`, `Name`, `K` or `Key`, and
/// their value `value` or `v`. Non-string keys are used as JSON text.
fn from_entries(input: &Value) -> Result<Value> {
    let mut object = Map::new();
    for item in value::iterate(input)? {
        let Value::Object(fields) = &item else {
            return Err(EvalError::type_error(format!(
                "Cannot index {} with \"key\"",
                type_name(&item)
            )));
        };
        let key = match fields.get("key") {
            Some(key) if !key.is_null() => key.clone(),
            _ => ["k", "name", "Name", "K"]
                .iter()
                .filter_map(|name| fields.get(*name))
                .find(|v| truthy(v))
                .or_else(|| fields.get("Key"))
                .cloned()
                .unwrap_or(Value::Null),
        };
        let key = match key {
            Value::String(text) => text,
            other => other.to_string(),
        };
        let value = if fields.contains_key("value") {
            fields.get("value")
        } else {
            fields.get("v")
        };
        object.insert(key, value.cloned().unwrap_or(Value::Null));
    }
    Ok(Value::Object(object))
}

/// Stable sort of an array by the `[f]` key of each element.
fn keyed<'a>(
    cx: &Cx<'_>,
    input: &Value,
    f: &'a Ast,
    env: Env<'a>,
    what: &str,
) -> std::result::Result<Vec<(Value, Value)>, Unwind> {
    let items = array_input(input, what)?;
    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        pairs.push((Value::Array(cx.collect(f, item, env)?), item.clone()));
    }
    pairs.sort_by(|a, b| compare(&a.0, &b.0));
    Ok(pairs)
}

fn group_runs(pairs: Vec<(Value, Value)>) -> Vec<Vec<Value>> {
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for (key, item) in pairs {
        match groups.last_mut() {
            Some((last, members)) if equal(last, &key) => members.push(item),
            _ => groups.push((key, vec![item])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

fn extreme_by<'a>(
    cx: &Cx<'_>,
    input: &Value,
    f: &'a Ast,
    env: Env<'a>,
    want: Ordering,
) -> std::result::Result<Value, Unwind> {
    let items = array_input(input, "compared")?;
    let mut best: Option<(Value, &Value)> = None;
    for item in items {
        let key = Value::Array(cx.collect(f, item, env)?);
        let replace = match &best {
            None => true,
            Some((best_key, _)) => {
                let ord = compare(&key, best_key);
                ord == want || (want == Ordering::Greater && ord == Ordering::Equal)
            }
        };
        if replace {
            best = Some((key, item));
        }
    }
    Ok(best.map(|(_, item)| item.clone()).unwrap_or(Value::Null))
}

fn flatten(input: &Value, depth: f64) -> Result<Value> {
    fn walk(items: &[Value], depth: f64, out: &mut Vec<Value>) {
        for item in items {
            match item {
                Value::Array(inner) if depth > 0.0 => walk(inner, depth - 1.0, out),
                other => out.push(other.clone()),
            }
        }
    }
    let items = array_input(input, "flattened")?;
    let mut out = Vec::new();
    walk(items, depth, &mut out);
    Ok(Value::Array(out))
}

fn to_number(input: &Value) -> Result<Value> {
    match input {
        Value::Number(_) => Ok(input.clone()),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(number)
            .ok_or_else(|| EvalError::type_error(format!("Cannot parse '{text}' as JSON"))),
        other => Err(EvalError::type_error(format!(
            "{} cannot be parsed as a number",
            describe(other)
        ))),
    }
}

fn join(input: &Value, sep: &Value) -> Result<Value> {
    let Value::String(sep) = sep else {
        return Err(EvalError::type_error("join separator must be a string"));
    };
    let mut joined = String::new();
    for (i, item) in value::iterate(input)?.iter().enumerate() {
        if i > 0 {
            joined.push_str(sep);
        }
        match item {
            Value::Null => {}
            Value::String(text) => joined.push_str(text),
            Value::Number(_) | Value::Bool(_) => joined.push_str(&item.to_string()),
            other => {
                return Err(EvalError::type_error(format!(
                    "Cannot join with {}",
                    type_name(other)
                )))
            }
        }
    }
    Ok(Value::String(joined))
}

/// Resolve the pattern for a regex builtin: the one compiled with the
/// filter, or the runtime pattern and flags. Flags vary slowest.
fn with_regexes<'a>(
    cx: &Cx<'_>,
    call: &'a Call,
    input: &Value,
    env: Env<'a>,
    f: &mut dyn FnMut(&Regex, &str, Modifiers) -> Flow,
) -> Flow {
    let text = match input {
        Value::String(text) => text.as_str(),
        other => {
            return Err(EvalError::type_error(format!(
                "{} cannot be matched, as it is not a string",
                describe(other)
            ))
            .into())
        }
    };
    let global = call.builtin.always_global();
    let mut with_flags = |flags: Value| -> Flow {
        let flags = match flags {
            Value::Null => String::new(),
            Value::String(flags) => flags,
            other => {
                return Err(EvalError::type_error(format!("{} is not a string", describe(&other))).into())
            }
        };
        let mut modifiers = Modifiers::parse(&flags).map_err(EvalError::type_error)?;
        modifiers.global |= global;
        if let Some(re) = &call.regex {
            return f(re, text, modifiers);
        }
        cx.eval(&call.args[0], input, env, &mut |pattern| {
            let Value::String(pattern) = &pattern else {
                return Err(EvalError::type_error(format!(
                    "{} cannot be matched, as it is not a string",
                    describe(&pattern)
                ))
                .into());
            };
            let (re, _) = strings::compile_regex(pattern, &flags).map_err(|message| {
                EvalError::type_error(format!("{pattern} (at offset 0) is not a valid regex: {message}"))
            })?;
            f(&re, text, modifiers)
        })
    };
    match call.builtin.regex_flags_arg().flatten() {
        Some(at) => cx.eval(&call.args[at], input, env, &mut |flags| with_flags(flags)),
        None => with_flags(Value::Null),
    }
}

/// `sub`/`gsub`: replacement expressions run with the named captures object
/// as input, and each of their outputs forks the result.
struct Substitution<'r, 'a> {
    re: &'r Regex,
    text: &'r str,
    replacement: &'a Ast,
    env: Env<'a>,
}

impl Substitution<'_, '_> {
    fn run(
        &self,
        cx: &Cx<'_>,
        found: &[Captures<'_>],
        done: String,
        last: usize,
        out: &mut Sink<'_>,
    ) -> Flow {
        let Some((caps, rest)) = found.split_first() else {
            return out(Value::String(format!("{done}{}", &self.text[last..])));
        };
        let Some(whole) = caps.get(0) else {
            return self.run(cx, rest, done, last, out);
        };
        let between = &self.text[last..whole.start()];
        let captures = strings::captures_object(self.re, caps);
        cx.eval(self.replacement, &captures, self.env, &mut |replacement| match replacement {
            Value::String(replacement) => self.run(
                cx,
                rest,
                format!("{done}{between}{replacement}"),
                whole.end(),
                &mut *out,
            ),
            other => Err(EvalError::type_error(format!(
                "{} cannot be added to a string",
                describe(&other)
            ))
            .into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn resolve_checks_arity() {
        assert_eq!(Builtin::resolve("select", 1), Some(Builtin::Select));
        assert_eq!(Builtin::resolve("select", 0), None);
        assert_eq!(Builtin::resolve("range", 3), Some(Builtin::Range3));
        assert_eq!(Builtin::resolve("trim", 0), Some(Builtin::Trim(Trim::Both)));
        assert_eq!(
            Builtin::resolve("pow", 2),
            Some(Builtin::Math2(BinaryMath::Pow))
        );
        assert_eq!(Builtin::resolve("frobnicate", 0), None);
    }

    #[test]
    fn regex_builtins_know_their_flags_argument() {
        assert_eq!(Builtin::Test1.regex_flags_arg(), Some(None));
        assert_eq!(Builtin::Split2.regex_flags_arg(), Some(Some(1)));
        assert_eq!(Builtin::Gsub3.regex_flags_arg(), Some(Some(2)));
        assert_eq!(Builtin::Split1.regex_flags_arg(), None);
        assert!(Builtin::Scan1.always_global());
        assert!(!Builtin::Match1.always_global());
    }

    #[test]
    fn containment() {
        assert!(contains(&json!({"a": [1, 2], "b": "xyz"}), &json!({"b": "y", "a": [2]})).unwrap());
        assert!(!contains(&json!([1, 2]), &json!([3])).unwrap());
        assert!(contains(&json!(1), &json!("a")).is_err());
    }

    #[test]
    fn entries_accept_arrays_and_alternate_key_names() {
        assert_eq!(
            to_entries(&json!(["a", "b"])).unwrap(),
            json!([{"key": 0, "value": "a"}, {"key": 1, "value": "b"}])
        );
        assert_eq!(
            from_entries(&json!([
                {"k": "x", "v": 1},
                {"name": "y", "value": 2},
                {"key": 3, "value": null},
                {"key": null, "Key": false, "value": 4},
            ]))
            .unwrap(),
            json!({"x": 1, "y": 2, "3": null, "false": 4})
        );
    }

    #[test]
    fn limit_counts() {
        assert_eq!(limit_count(&json!(2)).unwrap(), Some(2));
        assert_eq!(limit_count(&json!(0.5)).unwrap(), Some(1));
        assert_eq!(limit_count(&json!(-1)).unwrap(), None);
        assert!(limit_count(&json!("x")).is_err());
    }
}
