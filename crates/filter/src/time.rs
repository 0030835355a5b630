//! Date builtins. Broken-down times are
//! `[year, month (0-11), day, hours, minutes, seconds, weekday, yearday]`,
//! with fractional seconds kept in the sixth slot.

use crate::error::EvalError;
use crate::value::{as_f64, describe, number};
use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc,
};
use serde_json::{json, Value};
use std::fmt::{Display, Write as _};

type Result<T> = std::result::Result<T, EvalError>;

pub(crate) fn now() -> Value {
    let now = Utc::now();
    number(now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9)
}

pub(crate) fn gmtime(input: &Value) -> Result<Value> {
    let (dt, fraction) = utc_from_seconds(input, "gmtime")?;
    Ok(broken_down(&dt.naive_utc(), fraction))
}

pub(crate) fn localtime(input: &Value) -> Result<Value> {
    let (dt, fraction) = utc_from_seconds(input, "localtime")?;
    Ok(broken_down(&dt.with_timezone(&Local).naive_local(), fraction))
}

/// Seconds since the epoch for a broken-down UTC time.
pub(crate) fn mktime(input: &Value) -> Result<Value> {
    let naive = from_broken_down(input, "mktime")?;
    Ok(Value::from(naive.and_utc().timestamp()))
}

pub(crate) fn strftime(input: &Value, format: &Value, local: bool) -> Result<Value> {
    let name = if local { "strflocaltime" } else { "strftime" };
    let Value::String(format) = format else {
        return Err(EvalError::type_error(format!("{name}/1 requires a string format")));
    };
    let naive = match input {
        Value::Number(_) => {
            let (dt, _) = utc_from_seconds(input, name)?;
            if local {
                return render(&dt.with_timezone(&Local), format).map(Value::String);
            }
            dt.naive_utc()
        }
        Value::Array(_) => from_broken_down(input, name)?,
        other => {
            return Err(EvalError::type_error(format!(
                "{name}/1 requires parsed datetime inputs, not {}",
                describe(other)
            )))
        }
    };
    let text = if local {
        match Local.from_local_datetime(&naive).earliest() {
            Some(dt) => render(&dt, format)?,
            None => render(&naive.and_utc(), format)?,
        }
    } else {
        render(&naive.and_utc(), format)?
    };
    Ok(Value::String(text))
}

pub(crate) fn strptime(input: &Value, format: &Value) -> Result<Value> {
    let (Value::String(text), Value::String(format)) = (input, format) else {
        return Err(EvalError::type_error(format!(
            "strptime/1 requires string inputs and arguments, not {}",
            describe(input)
        )));
    };
    let parsed = DateTime::parse_from_str(text, format)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(text, format))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, format).map(|date| date.and_time(Default::default()))
        })
        .map_err(|_| {
            EvalError::type_error(format!("date \"{text}\" does not match format \"{format}\""))
        })?;
    Ok(broken_down(&parsed, 0.0))
}

/// RFC 3339 timestamp to seconds since the epoch.
pub(crate) fn from_iso8601(input: &Value) -> Result<Value> {
    let Value::String(text) = input else {
        return Err(EvalError::type_error(format!(
            "fromdateiso8601/0 requires string inputs, not {}",
            describe(input)
        )));
    };
    let dt = DateTime::parse_from_rfc3339(text).map_err(|_| {
        EvalError::type_error(format!(
            "date \"{text}\" does not match format \"%Y-%m-%dT%H:%M:%SZ\""
        ))
    })?;
    Ok(number(
        dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9,
    ))
}

fn utc_from_seconds(input: &Value, name: &str) -> Result<(DateTime<Utc>, f64)> {
    let seconds = as_f64(input).ok_or_else(|| {
        EvalError::type_error(format!("{name}() requires a number, not {}", describe(input)))
    })?;
    let whole = seconds.floor();
    let dt = DateTime::<Utc>::from_timestamp(whole as i64, 0)
        .ok_or_else(|| EvalError::type_error(format!("{name}() timestamp is out of range")))?;
    Ok((dt, seconds - whole))
}

fn broken_down(dt: &NaiveDateTime, fraction: f64) -> Value {
    json!([
        dt.year(),
        dt.month0(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        number(f64::from(dt.second()) + fraction),
        dt.weekday().num_days_from_sunday(),
        dt.ordinal0(),
    ])
}

fn from_broken_down(value: &Value, name: &str) -> Result<NaiveDateTime> {
    let invalid = || EvalError::type_error(format!("{name} requires array of 6 numbers"));
    let Value::Array(parts) = value else {
        return Err(EvalError::type_error(format!(
            "{name} requires array of 6 numbers, not {}",
            describe(value)
        )));
    };
    let fields: Vec<f64> = parts
        .iter()
        .take(6)
        .map(as_f64)
        .collect::<Option<_>>()
        .ok_or_else(invalid)?;
    let [year, month0, day, hour, minute, second] = fields[..] else {
        return Err(invalid());
    };
    if !(0.0..12.0).contains(&month0) {
        return Err(EvalError::type_error(format!("{name}: month {month0} is out of range")));
    }
    let first = NaiveDate::from_ymd_opt(year as i32, month0 as u32 + 1, 1)
        .ok_or_else(|| EvalError::type_error(format!("{name}: year {year} is out of range")))?;
    let offset = (day - 1.0) * 86_400.0 + hour * 3_600.0 + minute * 60.0 + second.floor();
    TimeDelta::try_seconds(offset as i64)
        .and_then(|delta| first.and_time(Default::default()).checked_add_signed(delta))
        .ok_or_else(|| EvalError::type_error(format!("{name}: time is out of range")))
}

fn render<Tz>(dt: &DateTime<Tz>, format: &str) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(EvalError::type_error(format!(
            "{format} is not a valid time format"
        )));
    }
    let mut text = String::new();
    write!(text, "{}", dt.format_with_items(items.iter()))
        .map_err(|_| EvalError::type_error(format!("cannot format time with {format}")))?;
    Ok(text)
}
