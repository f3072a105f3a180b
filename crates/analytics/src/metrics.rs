//! Named numeric metrics and reset instants for the report layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracker_core::UsageLimitSnapshot;

use crate::blocks::{BillingBlock, burn_rate};
use crate::daily::DailyTotals;

pub const BLOCK_COST_USD: &str = "block_cost_usd";
pub const BLOCK_TOTAL_TOKENS: &str = "block_total_tokens";
pub const BLOCK_MESSAGES: &str = "block_messages";
pub const BURN_RATE_USD_PER_HOUR: &str = "burn_rate_usd_per_hour";
pub const TODAY_COST_USD: &str = "today_cost_usd";
pub const TODAY_TOTAL_TOKENS: &str = "today_total_tokens";
pub const BLOCK_RESET: &str = "block";

/// Metric name for a limit window, e.g. `limit_5h_used_pct`.
pub fn limit_metric_name(limit_type: &str) -> String {
    format!("limit_{limit_type}_used_pct")
}

pub fn limit_reset_name(limit_type: &str) -> String {
    format!("limit_{limit_type}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageMetrics {
    pub metrics: BTreeMap<String, f64>,
    pub resets: BTreeMap<String, DateTime<Utc>>,
    /// Subset of `metrics` holding quota percentages.
    #[serde(skip)]
    pub percentages: BTreeMap<String, f64>,
}

/// Newest snapshot per limit type whose reset is still ahead of `now`.
pub fn current_limits(
    snapshots: &[UsageLimitSnapshot],
    now: DateTime<Utc>,
) -> BTreeMap<String, UsageLimitSnapshot> {
    let mut latest: BTreeMap<String, UsageLimitSnapshot> = BTreeMap::new();
    for snapshot in snapshots.iter().filter(|snapshot| snapshot.reset_at > now) {
        let newer = latest
            .get(&snapshot.limit_type)
            .is_none_or(|current| snapshot.observed_at > current.observed_at);
        if newer {
            latest.insert(snapshot.limit_type.clone(), snapshot.clone());
        }
    }
    latest
}

/// Live metrics: active block figures, today's totals and limit usage.
/// Block metrics are omitted when no block is active.
pub fn usage_metrics(
    active: Option<&BillingBlock>,
    daily: &[DailyTotals],
    snapshots: &[UsageLimitSnapshot],
    now: DateTime<Utc>,
) -> UsageMetrics {
    let mut out = UsageMetrics::default();
    if let Some(block) = active {
        out.metrics.insert(BLOCK_COST_USD.to_string(), block.cost_usd);
        out.metrics
            .insert(BLOCK_TOTAL_TOKENS.to_string(), block.total_tokens as f64);
        out.metrics
            .insert(BLOCK_MESSAGES.to_string(), block.message_count as f64);
        if let Some(rate) = burn_rate(block, now) {
            out.metrics.insert(BURN_RATE_USD_PER_HOUR.to_string(), rate);
        }
        out.resets.insert(BLOCK_RESET.to_string(), block.end);
    }
    let today = now.date_naive();
    if let Some(day) = daily.iter().find(|day| day.date == today) {
        out.metrics.insert(TODAY_COST_USD.to_string(), day.cost_usd);
        out.metrics
            .insert(TODAY_TOTAL_TOKENS.to_string(), day.total_tokens as f64);
    }
    for (limit_type, snapshot) in current_limits(snapshots, now) {
        let name = limit_metric_name(&limit_type);
        out.metrics.insert(name.clone(), snapshot.used_percent);
        out.percentages.insert(name, snapshot.used_percent);
        out.resets
            .insert(limit_reset_name(&limit_type), snapshot.reset_at);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn snapshot(limit_type: &str, pct: f64, observed_min_ago: i64, resets_in_h: i64) -> UsageLimitSnapshot {
        UsageLimitSnapshot {
            limit_type: limit_type.to_string(),
            used_percent: pct,
            reset_at: now() + Duration::hours(resets_in_h),
            observed_at: now() - Duration::minutes(observed_min_ago),
            source: "test".to_string(),
        }
    }

    #[test]
    fn newest_unexpired_snapshot_wins() {
        let snapshots = vec![
            snapshot("5h", 40.0, 30, 2),
            snapshot("5h", 55.0, 5, 2),
            snapshot("7d", 99.0, 1, -1),
        ];
        let limits = current_limits(&snapshots, now());
        assert_eq!(limits.len(), 1);
        assert!((limits["5h"].used_percent - 55.0).abs() < 1e-9);
    }

    #[test]
    fn block_metrics_only_when_active() {
        let block = BillingBlock {
            start: now() - Duration::hours(2),
            end: now() + Duration::hours(3),
            cost_usd: 4.0,
            total_tokens: 1000,
            message_count: 3,
            ..BillingBlock::default()
        };
        let metrics = usage_metrics(Some(&block), &[], &[snapshot("5h", 91.0, 1, 1)], now());
        assert_eq!(metrics.metrics[BLOCK_COST_USD], 4.0);
        assert!((metrics.metrics[BURN_RATE_USD_PER_HOUR] - 2.0).abs() < 1e-9);
        assert_eq!(metrics.resets[BLOCK_RESET], block.end);
        assert_eq!(metrics.percentages["limit_5h_used_pct"], 91.0);
        assert!(metrics.resets.contains_key("limit_5h"));

        let idle = usage_metrics(None, &[], &[], now());
        assert!(idle.metrics.is_empty());
        assert!(idle.resets.is_empty());
    }
}
