use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use tracker_core::{EventType, TelemetryEvent, TokenCounters};

/// Default billing window length.
pub const DEFAULT_BLOCK_HOURS: i64 = 5;

/// Seconds that must pass after a block starts before a burn rate is reported.
pub const MIN_BURN_RATE_SECONDS: i64 = 60;

/// One fixed-length billing window and everything billed inside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BillingBlock {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    pub models_seen: BTreeSet<String>,
}

impl BillingBlock {
    fn open(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
            ..Self::default()
        }
    }

    /// Events strictly after `end` belong to a later block.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Whether `now` lies inside the live window.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    pub fn counters(&self) -> TokenCounters {
        TokenCounters {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            reasoning_tokens: self.reasoning_tokens,
            cache_read_tokens: self.cache_read_tokens,
            cache_write_tokens: self.cache_write_tokens,
        }
    }

    fn add(&mut self, event: &TelemetryEvent) {
        let counters = self.counters().saturating_add(event.counters());
        self.input_tokens = counters.input_tokens;
        self.output_tokens = counters.output_tokens;
        self.reasoning_tokens = counters.reasoning_tokens;
        self.cache_read_tokens = counters.cache_read_tokens;
        self.cache_write_tokens = counters.cache_write_tokens;
        self.total_tokens = self.total_tokens.saturating_add(event.token_total());
        self.cost_usd += event.cost_usd.unwrap_or(0.0);
        self.message_count += 1;
        if let Some(model) = event.model_raw.as_deref().filter(|model| !model.is_empty()) {
            self.models_seen.insert(model.to_string());
        }
    }
}

/// Truncates to the start of the hour, e.g. 14:37:22 becomes 14:00:00.
pub fn floor_to_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_minute(0)
        .and_then(|value| value.with_second(0))
        .and_then(|value| value.with_nanosecond(0))
        .unwrap_or(at)
}

/// Buckets the `message_usage` events of `events` into billing blocks.
///
/// Input order does not matter. Each block starts at the floor-to-hour of
/// the first event it holds and spans `duration`; an event strictly after
/// the current block's end opens the next one.
pub fn identify_blocks(events: &[TelemetryEvent], duration: Duration) -> Vec<BillingBlock> {
    let mut usage: Vec<&TelemetryEvent> = events
        .iter()
        .filter(|event| event.event_type == EventType::MessageUsage)
        .collect();
    usage.sort_by_key(|event| event.occurred_at);

    let mut blocks: Vec<BillingBlock> = Vec::new();
    for event in usage {
        let needs_new = blocks
            .last()
            .is_none_or(|block| !block.covers(event.occurred_at));
        if needs_new {
            blocks.push(BillingBlock::open(floor_to_hour(event.occurred_at), duration));
        }
        if let Some(block) = blocks.last_mut() {
            block.add(event);
        }
    }
    blocks
}

/// The block whose window contains `now`, if any.
pub fn active_block(blocks: &[BillingBlock], now: DateTime<Utc>) -> Option<&BillingBlock> {
    blocks.iter().rev().find(|block| block.is_active_at(now))
}

/// Cost per hour since the block started. `None` until a minute has passed.
pub fn burn_rate(block: &BillingBlock, now: DateTime<Utc>) -> Option<f64> {
    let elapsed = now.signed_duration_since(block.start);
    if elapsed <= Duration::seconds(MIN_BURN_RATE_SECONDS) {
        return None;
    }
    let hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
    Some(block.cost_usd / hours)
}
