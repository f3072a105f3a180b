//! Path-based lookups over loosely shaped JSON records.
//!
//! Every lookup takes candidate key paths in priority order and returns the
//! first value that coerces. Nothing here fails: a missing or malformed field
//! reads as `None`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

const EPOCH_MICROS_THRESHOLD: i64 = 1_000_000_000_000_000;
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Follows `path` through objects; numeric segments also index arrays.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = match current {
            Value::Object(map) => map.get(*key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn find_map<T>(value: &Value, paths: &[&[&str]], coerce: impl Fn(&Value) -> Option<T>) -> Option<T> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(coerce)
}

pub fn find_string(value: &Value, paths: &[&[&str]]) -> Option<String> {
    find_map(value, paths, value_to_string)
}

pub fn find_u64(value: &Value, paths: &[&[&str]]) -> Option<u64> {
    find_map(value, paths, value_to_u64)
}

pub fn find_f64(value: &Value, paths: &[&[&str]]) -> Option<f64> {
    find_map(value, paths, value_to_f64)
}

pub fn find_bool(value: &Value, paths: &[&[&str]]) -> Option<bool> {
    find_map(value, paths, |value| match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(number) => number.as_i64().map(|value| value != 0),
        _ => None,
    })
}

pub fn find_timestamp(value: &Value, paths: &[&[&str]]) -> Option<DateTime<Utc>> {
    find_map(value, paths, value_to_timestamp)
}

/// Scalar as trimmed text; empty strings, objects and arrays are absent.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn clean_numeric(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|ch| *ch != ',' && *ch != '_')
        .collect()
}

pub fn value_to_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => clean_numeric(text).parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Non-negative integer; floats are truncated.
pub fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => {
            if let Some(value) = number.as_u64() {
                return Some(value);
            }
            if number.as_i64().is_some() {
                return None;
            }
            let value = number.as_f64()?;
            (value.is_finite() && value >= 0.0).then_some(value as u64)
        }
        Value::String(text) => {
            let cleaned = clean_numeric(text);
            if let Ok(value) = cleaned.parse::<u64>() {
                return Some(value);
            }
            let value = cleaned.parse::<f64>().ok()?;
            (value.is_finite() && value >= 0.0).then_some(value as u64)
        }
        _ => None,
    }
}

pub fn value_to_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp_str(text),
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                return timestamp_from_epoch(value);
            }
            timestamp_from_epoch_f64(number.as_f64()?)
        }
        _ => None,
    }
}

/// RFC-3339, naive `T`- or space-separated date-times (read as UTC), or a
/// bare epoch integer.
pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc));
        }
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()) {
        return raw.parse::<i64>().ok().and_then(timestamp_from_epoch);
    }
    None
}

/// Epoch integer whose unit is inferred from its magnitude.
pub fn timestamp_from_epoch(value: i64) -> Option<DateTime<Utc>> {
    let magnitude = value.unsigned_abs();
    if magnitude > EPOCH_MICROS_THRESHOLD as u64 {
        DateTime::<Utc>::from_timestamp_micros(value)
    } else if magnitude > EPOCH_MILLIS_THRESHOLD as u64 {
        DateTime::<Utc>::from_timestamp_millis(value)
    } else {
        DateTime::<Utc>::from_timestamp(value, 0)
    }
}

fn timestamp_from_epoch_f64(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let magnitude = value.abs();
    let micros = if magnitude > EPOCH_MICROS_THRESHOLD as f64 {
        value
    } else if magnitude > EPOCH_MILLIS_THRESHOLD as f64 {
        value * 1_000.0
    } else {
        value * 1_000_000.0
    };
    DateTime::<Utc>::from_timestamp_micros(micros.round() as i64)
}
