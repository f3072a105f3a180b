use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde_json::Value;
use tracker_core::UsageLimitSnapshot;

use crate::fields::{find_f64, lookup, parse_timestamp_str, value_to_f64, value_to_timestamp};

const USED_PERCENT_KEYS: [&str; 3] = ["used_percent", "used_pct", "percent_used"];
const REMAINING_PERCENT_KEYS: [&str; 4] = [
    "percent_left",
    "remaining_percent",
    "remaining_pct",
    "percent_remaining",
];

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

// Bare `used`/`remaining` values may be a 0..1 fraction or a percentage.
fn ambiguous_percent(value: f64) -> f64 {
    clamp_percent(if value <= 1.0 { value * 100.0 } else { value })
}

fn first_f64(limit: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| limit.get(*key).and_then(value_to_f64))
}

fn normalize_reset_at(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_second(0)
        .and_then(|value| value.with_nanosecond(0))
        .unwrap_or(dt)
}

fn next_occurrence(time: NaiveTime, reference: DateTime<Utc>) -> DateTime<Utc> {
    let mut parsed = NaiveDateTime::new(reference.date_naive(), time);
    let mut dt = DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc);
    if dt <= reference {
        parsed += Duration::days(1);
        dt = DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc);
    }
    dt
}

fn parse_reset_text(value: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(parsed) = parse_timestamp_str(value) {
        return Some(parsed);
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            let parsed = date.and_hms_opt(0, 0, 0)?;
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc));
        }
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(value, format) {
            return Some(next_occurrence(time, reference));
        }
    }
    None
}

fn extract_reset_at(limit: &Value, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    for key in ["reset_at", "resets_at", "resetAt", "reset", "reset_time", "resetTime"] {
        let Some(raw) = limit.get(key) else {
            continue;
        };
        let parsed = match raw {
            Value::String(text) => parse_reset_text(text.trim(), reference),
            other => value_to_timestamp(other),
        };
        if let Some(parsed) = parsed {
            return Some(normalize_reset_at(parsed));
        }
    }
    let seconds = find_f64(
        limit,
        &[&["resets_in_seconds"], &["reset_after_seconds"], &["resetsInSeconds"]],
    )?;
    if seconds < 0.0 {
        return None;
    }
    let offset = Duration::milliseconds((seconds * 1000.0) as i64);
    Some(normalize_reset_at(reference + offset))
}

fn extract_used_percent(limit: &Value) -> Option<f64> {
    if let Some(value) = first_f64(limit, &USED_PERCENT_KEYS) {
        return Some(clamp_percent(value));
    }
    if let Some(value) = first_f64(limit, &["used_fraction"]) {
        return Some(clamp_percent(value * 100.0));
    }
    if let Some(value) = first_f64(limit, &["used"]) {
        return Some(ambiguous_percent(value));
    }
    let left = if let Some(value) = first_f64(limit, &REMAINING_PERCENT_KEYS) {
        clamp_percent(value)
    } else if let Some(value) = first_f64(limit, &["remaining_fraction"]) {
        clamp_percent(value * 100.0)
    } else {
        ambiguous_percent(first_f64(limit, &["remaining"])?)
    };
    Some(clamp_percent(100.0 - left))
}

fn limit_type_label(key: &str, limit: &Value) -> Option<String> {
    match key {
        "primary" => Some("5h".to_string()),
        "secondary" => Some("7d".to_string()),
        _ => {
            let minutes = find_f64(limit, &[&["window_minutes"], &["windowMinutes"]])?;
            Some(format!("{}m", minutes as u64))
        }
    }
}

fn rate_limits(value: &Value) -> Option<&Value> {
    [
        &["payload", "rate_limits"][..],
        &["payload", "info", "rate_limits"][..],
        &["rate_limits"][..],
    ]
    .into_iter()
    .find_map(|path| lookup(value, path).filter(|found| found.is_object()))
}

/// Limit snapshots from a record's `rate_limits` block, observed at
/// `observed_at`.
pub fn extract_limit_snapshots(
    value: &Value,
    observed_at: DateTime<Utc>,
    source: &str,
) -> Vec<UsageLimitSnapshot> {
    let Some(map) = rate_limits(value).and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut snapshots = Vec::new();
    for (key, limit) in map {
        if !limit.is_object() {
            continue;
        }
        let Some(limit_type) = limit_type_label(key, limit) else {
            continue;
        };
        let Some(used_percent) = extract_used_percent(limit) else {
            continue;
        };
        let Some(reset_at) = extract_reset_at(limit, observed_at) else {
            continue;
        };
        snapshots.push(UsageLimitSnapshot {
            limit_type,
            used_percent,
            reset_at,
            observed_at,
            source: source.to_string(),
        });
    }
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tracker_core::{UsageStatus, status_from_percentages};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn extracts_primary_and_secondary_windows() {
        let value = json!({"payload": {"rate_limits": {
            "primary": {"used_fraction": 0.25, "resets_at": "2025-01-01T05:00:00Z"},
            "secondary": {"remaining_percent": 40, "resets_at": "2025-01-08T00:00:00Z"}
        }}});
        let snapshots = extract_limit_snapshots(&value, at(0, 0), "test.jsonl");
        assert_eq!(snapshots.len(), 2);
        let primary = snapshots
            .iter()
            .find(|snap| snap.limit_type == "5h")
            .expect("primary");
        assert!((primary.used_percent - 25.0).abs() < 1e-6);
        assert_eq!(primary.reset_at, at(5, 0));
        let secondary = snapshots
            .iter()
            .find(|snap| snap.limit_type == "7d")
            .expect("secondary");
        assert!((secondary.used_percent - 60.0).abs() < 1e-6);
    }

    #[test]
    fn relative_reset_is_anchored_on_observation() {
        let value = json!({"rate_limits": {
            "primary": {"used_percent": 12.0, "window_minutes": 300, "resets_in_seconds": 3600}
        }});
        let snapshots = extract_limit_snapshots(&value, at(4, 0), "test.jsonl");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].reset_at, at(5, 0));
        assert!((snapshots[0].used_percent - 12.0).abs() < 1e-6);
    }

    #[test]
    fn time_only_reset_rolls_forward() {
        let value = json!({"rate_limits": {"primary": {"remaining": 0.5, "resets_at": "05:30"}}});
        let snapshots = extract_limit_snapshots(&value, at(4, 0), "test.jsonl");
        assert_eq!(snapshots[0].reset_at, at(5, 30));
        let snapshots = extract_limit_snapshots(&value, at(6, 0), "test.jsonl");
        assert_eq!(
            snapshots[0].reset_at,
            Utc.with_ymd_and_hms(2025, 1, 2, 5, 30, 0).unwrap()
        );
    }

    #[test]
    fn epoch_reset_is_accepted() {
        let value = json!({"rate_limits": {"primary": {"used_percent": 50, "resets_at": at(5, 0).timestamp()}}});
        let snapshots = extract_limit_snapshots(&value, at(4, 0), "test.jsonl");
        assert_eq!(snapshots[0].reset_at, at(5, 0));
    }

    #[test]
    fn unknown_windows_without_duration_are_ignored() {
        let value = json!({"rate_limits": {"tertiary": {"used_percent": 50, "resets_in_seconds": 10}}});
        assert!(extract_limit_snapshots(&value, at(4, 0), "test.jsonl").is_empty());
    }

    #[test]
    fn small_percent_readings_are_not_scaled() {
        let value = json!({"rate_limits": {
            "primary": {"used_percent": 1.0, "resets_in_seconds": 3600},
            "secondary": {"used_percent": 0.5, "resets_in_seconds": 3600}
        }});
        let snapshots = extract_limit_snapshots(&value, at(4, 0), "test.jsonl");
        assert_eq!(snapshots.len(), 2);
        for snapshot in &snapshots {
            assert!(snapshot.used_percent <= 1.0, "{snapshot:?}");
        }
        let status = status_from_percentages(snapshots.iter().map(|snap| snap.used_percent));
        assert_eq!(status, UsageStatus::Ok);
    }

    #[test]
    fn fraction_keys_are_scaled() {
        let value = json!({"rate_limits": {
            "primary": {"used_fraction": 0.93, "resets_in_seconds": 3600},
            "secondary": {"remaining_fraction": 0.0, "resets_in_seconds": 3600}
        }});
        let snapshots = extract_limit_snapshots(&value, at(4, 0), "test.jsonl");
        let primary = snapshots.iter().find(|snap| snap.limit_type == "5h").expect("primary");
        assert!((primary.used_percent - 93.0).abs() < 1e-9);
        let secondary = snapshots.iter().find(|snap| snap.limit_type == "7d").expect("secondary");
        assert_eq!(secondary.used_percent, 100.0);
    }
}
