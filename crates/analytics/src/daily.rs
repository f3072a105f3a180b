use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracker_core::{EventType, TelemetryEvent};

/// Usage billed on one UTC calendar day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyTotals {
    pub date: NaiveDate,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    pub tool_calls: u64,
    pub models_seen: BTreeSet<String>,
}

/// Per-day totals keyed by UTC date, oldest first.
pub fn daily_totals(events: &[TelemetryEvent]) -> Vec<DailyTotals> {
    let mut days: BTreeMap<NaiveDate, DailyTotals> = BTreeMap::new();
    for event in events {
        let date = event.occurred_at.date_naive();
        let day = days.entry(date).or_insert_with(|| DailyTotals {
            date,
            ..DailyTotals::default()
        });
        match event.event_type {
            EventType::MessageUsage => {
                let counters = event.counters();
                day.input_tokens = day.input_tokens.saturating_add(counters.input_tokens);
                day.output_tokens = day.output_tokens.saturating_add(counters.output_tokens);
                day.reasoning_tokens = day.reasoning_tokens.saturating_add(counters.reasoning_tokens);
                day.cache_read_tokens = day.cache_read_tokens.saturating_add(counters.cache_read_tokens);
                day.cache_write_tokens = day
                    .cache_write_tokens
                    .saturating_add(counters.cache_write_tokens);
                day.total_tokens = day.total_tokens.saturating_add(event.token_total());
                day.cost_usd += event.cost_usd.unwrap_or(0.0);
                day.message_count += 1;
                if let Some(model) = event.model_raw.as_deref().filter(|model| !model.is_empty()) {
                    day.models_seen.insert(model.to_string());
                }
            }
            EventType::ToolUsage => day.tool_calls += 1,
            EventType::TurnCompleted | EventType::RawEnvelope => {}
        }
    }
    days.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tracker_core::Channel;

    fn event(event_type: EventType, day: u32, hour: u32, tokens: u64) -> TelemetryEvent {
        let mut event = TelemetryEvent::new(
            Channel::Hook,
            event_type,
            Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap(),
            "codex",
        );
        if event_type == EventType::MessageUsage {
            event.input_tokens = Some(tokens);
            event.cost_usd = Some(0.5);
        }
        event
    }

    #[test]
    fn buckets_by_utc_day_independent_of_blocks() {
        let events = vec![
            event(EventType::MessageUsage, 2, 23, 10),
            event(EventType::MessageUsage, 1, 22, 5),
            event(EventType::MessageUsage, 2, 1, 7),
            event(EventType::ToolUsage, 2, 1, 0),
            event(EventType::TurnCompleted, 3, 1, 0),
        ];
        let days = daily_totals(&events);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(days[0].total_tokens, 5);
        assert_eq!(days[1].total_tokens, 17);
        assert_eq!(days[1].message_count, 2);
        assert_eq!(days[1].tool_calls, 1);
        assert!((days[1].cost_usd - 1.0).abs() < 1e-9);
        assert_eq!(days[2].message_count, 0);
    }
}
