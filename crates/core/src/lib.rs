use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod pricing;
mod status;

pub use pricing::{
    CostBreakdown, PricingFallback, PricingRate, PricingTable, apply_estimated_costs,
    compute_cost_breakdown, estimate_event_cost, model_matches_pattern,
};
pub use status::{
    LIMITED_PERCENT, NEAR_LIMIT_PERCENT, UsageStatus, derive_status, status_from_percentages,
};

pub const SCHEMA_VERSION: u32 = 1;

/// Transport a telemetry record arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "hook")]
    Hook,
    #[serde(rename = "streaming")]
    Streaming,
    #[serde(rename = "line-delimited-log")]
    LineDelimitedLog,
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "embedded-db")]
    EmbeddedDb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TurnCompleted,
    MessageUsage,
    ToolUsage,
    RawEnvelope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ok,
    Error,
    Aborted,
    #[default]
    Unknown,
}

/// Token counts for one observation. Counter-style sources report these as
/// running totals; everything downstream of the reconstructor sees deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl TokenCounters {
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.reasoning_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_write_tokens)
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    pub fn saturating_add(self, other: TokenCounters) -> TokenCounters {
        TokenCounters {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            reasoning_tokens: self.reasoning_tokens.saturating_add(other.reasoning_tokens),
            cache_read_tokens: self.cache_read_tokens.saturating_add(other.cache_read_tokens),
            cache_write_tokens: self
                .cache_write_tokens
                .saturating_add(other.cache_write_tokens),
        }
    }

    /// Field-wise `self - prev`; `None` when any field went backwards.
    pub fn checked_sub(self, prev: TokenCounters) -> Option<TokenCounters> {
        Some(TokenCounters {
            input_tokens: self.input_tokens.checked_sub(prev.input_tokens)?,
            output_tokens: self.output_tokens.checked_sub(prev.output_tokens)?,
            reasoning_tokens: self.reasoning_tokens.checked_sub(prev.reasoning_tokens)?,
            cache_read_tokens: self.cache_read_tokens.checked_sub(prev.cache_read_tokens)?,
            cache_write_tokens: self.cache_write_tokens.checked_sub(prev.cache_write_tokens)?,
        })
    }
}

/// The normalized, source-independent usage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub schema_version: u32,
    pub channel: Channel,
    pub occurred_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_raw: Option<String>,

    pub event_type: EventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Position of this call among the tool calls of its message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_index: Option<u32>,

    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(
        channel: Channel,
        event_type: EventType,
        occurred_at: DateTime<Utc>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            channel,
            occurred_at,
            account_id: None,
            workspace_id: None,
            session_id: None,
            turn_id: None,
            message_id: None,
            request_id: None,
            tool_call_id: None,
            provider_id: None,
            agent_name: agent_name.into(),
            model_raw: None,
            event_type,
            input_tokens: None,
            output_tokens: None,
            reasoning_tokens: None,
            cache_read_tokens: None,
            cache_write_tokens: None,
            total_tokens: None,
            requests: None,
            cost_usd: None,
            tool_name: None,
            tool_call_index: None,
            status: EventStatus::Unknown,
            payload: Map::new(),
        }
    }

    /// Overwrites the usage fields with `counters`, total included.
    pub fn set_counters(&mut self, counters: TokenCounters) {
        self.input_tokens = Some(counters.input_tokens);
        self.output_tokens = Some(counters.output_tokens);
        self.reasoning_tokens = Some(counters.reasoning_tokens);
        self.cache_read_tokens = Some(counters.cache_read_tokens);
        self.cache_write_tokens = Some(counters.cache_write_tokens);
        self.total_tokens = Some(counters.total());
    }

    /// Usage fields with absent values read as zero.
    pub fn counters(&self) -> TokenCounters {
        TokenCounters {
            input_tokens: self.input_tokens.unwrap_or(0),
            output_tokens: self.output_tokens.unwrap_or(0),
            reasoning_tokens: self.reasoning_tokens.unwrap_or(0),
            cache_read_tokens: self.cache_read_tokens.unwrap_or(0),
            cache_write_tokens: self.cache_write_tokens.unwrap_or(0),
        }
    }

    fn has_token_fields(&self) -> bool {
        self.input_tokens.is_some()
            || self.output_tokens.is_some()
            || self.reasoning_tokens.is_some()
            || self.cache_read_tokens.is_some()
            || self.cache_write_tokens.is_some()
    }

    /// Fills `total_tokens` from the sub-fields when the source left it out.
    pub fn normalize_totals(&mut self) {
        if self.total_tokens.is_none() && self.has_token_fields() {
            self.total_tokens = Some(self.counters().total());
        }
    }

    /// Total tokens, preferring the reported total over the computed sum.
    pub fn token_total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| self.counters().total())
    }

    /// True when the event reports non-zero tokens or a positive cost.
    pub fn has_usage(&self) -> bool {
        self.token_total() > 0 || self.cost_usd.is_some_and(|cost| cost > 0.0)
    }
}

/// Rate-limit observation: how much of a named quota window is consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLimitSnapshot {
    pub limit_type: String,
    pub used_percent: f64,
    pub reset_at: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
    pub source: String,
}

pub fn session_id_from_source(source: &str) -> String {
    let path = Path::new(source);
    let stem = path.file_stem().and_then(|value| value.to_str());
    if let Some(rest) = stem.and_then(|value| value.strip_prefix("rollout-"))
        && let Some(session_id) = rollout_session_id(rest)
    {
        return session_id.to_string();
    }
    match stem {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => source.to_string(),
    }
}

// `2025-12-20T00-00-00-<id>` or `2025-12-20T00-00-00Z-<id>`
fn rollout_session_id(rest: &str) -> Option<&str> {
    let time_start = rest.find('T')? + 1;
    let after_time = rest.get(time_start + 8..)?;
    let id = after_time.trim_start_matches('Z').strip_prefix('-')?;
    if id.is_empty() { None } else { Some(id) }
}
