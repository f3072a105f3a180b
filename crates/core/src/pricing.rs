use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EventType, TelemetryEvent, TokenCounters};

/// Per-million-token rates for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
    #[serde(default)]
    pub cache_read_per_million: f64,
    #[serde(default)]
    pub cache_create_per_million: f64,
}

/// Category rate used when no table key matches, e.g. `*haiku*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingFallback {
    pub pattern: String,
    pub rate: PricingRate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub models: BTreeMap<String, PricingRate>,
    #[serde(default)]
    pub fallbacks: Vec<PricingFallback>,
}

impl PricingTable {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.fallbacks.is_empty()
    }

    /// Exact id, then the longest key prefixing the id, then the first
    /// matching category pattern.
    pub fn resolve(&self, model: &str) -> Option<&PricingRate> {
        let normalized = normalize_model_id(model);
        if normalized.is_empty() {
            return None;
        }
        if let Some(rate) = self
            .models
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&normalized))
            .map(|(_, rate)| rate)
        {
            return Some(rate);
        }
        let prefixed = self
            .models
            .iter()
            .filter(|(key, _)| !key.is_empty() && normalized.starts_with(&key.to_ascii_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, rate)| rate);
        if prefixed.is_some() {
            return prefixed;
        }
        self.fallbacks
            .iter()
            .find(|fallback| model_matches_pattern(&normalized, &fallback.pattern))
            .map(|fallback| &fallback.rate)
    }
}

// Drops provider routing prefixes such as `anthropic/` or `openrouter/anthropic/`.
fn normalize_model_id(model: &str) -> String {
    let trimmed = model.trim();
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    base.to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub cache_read_cost_usd: f64,
    pub cache_write_cost_usd: f64,
    pub total_cost_usd: f64,
}

pub fn model_matches_pattern(model: &str, pattern: &str) -> bool {
    let model = model.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return model == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut remainder = model.as_str();
    let mut first = !pattern.starts_with('*');
    for part in parts {
        if part.is_empty() {
            continue;
        }
        if let Some(index) = remainder.find(part) {
            if first && index != 0 {
                return false;
            }
            remainder = &remainder[index + part.len()..];
            first = false;
        } else {
            return false;
        }
    }
    if pattern.ends_with('*') {
        true
    } else {
        remainder.is_empty()
    }
}

pub fn compute_cost_breakdown(usage: TokenCounters, rate: &PricingRate) -> CostBreakdown {
    let per_million = |tokens: u64, price: f64| (tokens as f64 / 1_000_000.0) * price;
    let input_cost = per_million(usage.input_tokens, rate.input_per_million);
    // Reasoning tokens bill at the output rate.
    let output_cost = per_million(
        usage.output_tokens.saturating_add(usage.reasoning_tokens),
        rate.output_per_million,
    );
    let cache_read_cost = per_million(usage.cache_read_tokens, rate.cache_read_per_million);
    let cache_write_cost = per_million(usage.cache_write_tokens, rate.cache_create_per_million);
    CostBreakdown {
        input_cost_usd: input_cost,
        output_cost_usd: output_cost,
        cache_read_cost_usd: cache_read_cost,
        cache_write_cost_usd: cache_write_cost,
        total_cost_usd: input_cost + output_cost + cache_read_cost + cache_write_cost,
    }
}

/// Table-derived cost for an event, `None` without a model or a rate.
pub fn estimate_event_cost(event: &TelemetryEvent, table: &PricingTable) -> Option<f64> {
    let model = event.model_raw.as_deref()?;
    let rate = table.resolve(model)?;
    Some(compute_cost_breakdown(event.counters(), rate).total_cost_usd)
}

/// Fills `cost_usd` on usage events the source did not price. Returns how
/// many events were priced.
pub fn apply_estimated_costs(events: &mut [TelemetryEvent], table: &PricingTable) -> usize {
    let mut priced = 0usize;
    for event in events
        .iter_mut()
        .filter(|event| event.event_type == EventType::MessageUsage)
    {
        if event.cost_usd.is_some_and(|cost| cost > 0.0) {
            continue;
        }
        if event.counters().is_zero() {
            continue;
        }
        if let Some(cost) = estimate_event_cost(event, table) {
            event.cost_usd = Some(cost);
            priced += 1;
        }
    }
    priced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Channel;
    use chrono::Utc;

    fn table() -> PricingTable {
        let mut models = BTreeMap::new();
        models.insert(
            "claude-opus-4".to_string(),
            PricingRate {
                input_per_million: 15.0,
                output_per_million: 75.0,
                cache_read_per_million: 1.5,
                cache_create_per_million: 18.75,
            },
        );
        models.insert(
            "claude-sonnet-4-5".to_string(),
            PricingRate {
                input_per_million: 3.0,
                output_per_million: 15.0,
                cache_read_per_million: 0.3,
                cache_create_per_million: 3.75,
            },
        );
        PricingTable {
            models,
            fallbacks: vec![PricingFallback {
                pattern: "*haiku*".to_string(),
                rate: PricingRate {
                    input_per_million: 0.8,
                    output_per_million: 4.0,
                    cache_read_per_million: 0.08,
                    cache_create_per_million: 1.0,
                },
            }],
        }
    }

    #[test]
    fn opus_cost_estimate_matches_reference_scenario() {
        let table = table();
        let rate = table.resolve("claude-opus-4-6").expect("rate");
        let usage = TokenCounters {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            reasoning_tokens: 0,
            cache_read_tokens: 500_000,
            cache_write_tokens: 200_000,
        };
        let cost = compute_cost_breakdown(usage, rate);
        assert!((cost.input_cost_usd - 15.0).abs() < 1e-9);
        assert!((cost.output_cost_usd - 7.5).abs() < 1e-9);
        assert!((cost.cache_read_cost_usd - 0.75).abs() < 1e-9);
        assert!((cost.cache_write_cost_usd - 3.75).abs() < 1e-9);
        assert!((cost.total_cost_usd - 27.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_haiku_model_uses_category_fallback() {
        let table = table();
        let rate = table.resolve("claude-3-5-haiku-20241022").expect("rate");
        assert_eq!(rate.input_per_million, 0.8);
        assert_eq!(rate.output_per_million, 4.0);
    }

    #[test]
    fn longest_prefix_wins() {
        let mut table = table();
        table.models.insert(
            "claude-sonnet-4".to_string(),
            PricingRate {
                input_per_million: 99.0,
                output_per_million: 99.0,
                ..PricingRate::default()
            },
        );
        let rate = table.resolve("claude-sonnet-4-5-20250929").expect("rate");
        assert_eq!(rate.input_per_million, 3.0);
    }

    #[test]
    fn resolve_strips_provider_prefix_and_case() {
        let table = table();
        assert!(table.resolve("anthropic/Claude-Opus-4-1").is_some());
        assert!(table.resolve("gpt-5").is_none());
        assert!(table.resolve("  ").is_none());
    }

    #[test]
    fn reasoning_tokens_bill_at_output_rate() {
        let rate = PricingRate {
            input_per_million: 1.0,
            output_per_million: 10.0,
            ..PricingRate::default()
        };
        let usage = TokenCounters {
            output_tokens: 500_000,
            reasoning_tokens: 500_000,
            ..TokenCounters::default()
        };
        let cost = compute_cost_breakdown(usage, &rate);
        assert!((cost.output_cost_usd - 10.0).abs() < 1e-9);
    }

    #[test]
    fn apply_estimated_costs_keeps_source_cost() {
        let table = table();
        let mut reported = TelemetryEvent::new(
            Channel::LineDelimitedLog,
            EventType::MessageUsage,
            Utc::now(),
            "claude",
        );
        reported.model_raw = Some("claude-opus-4-1".to_string());
        reported.input_tokens = Some(1_000);
        reported.cost_usd = Some(1.23);
        let mut unpriced = reported.clone();
        unpriced.cost_usd = None;
        let mut events = vec![reported, unpriced];

        assert_eq!(apply_estimated_costs(&mut events, &table), 1);
        assert_eq!(events[0].cost_usd, Some(1.23));
        assert!((events[1].cost_usd.unwrap() - 0.015).abs() < 1e-9);
    }

    #[test]
    fn pattern_matching_respects_anchors() {
        assert!(model_matches_pattern("claude-3-haiku", "*haiku*"));
        assert!(model_matches_pattern("gpt-5-codex", "gpt-5*"));
        assert!(!model_matches_pattern("my-gpt-5", "gpt-5*"));
        assert!(model_matches_pattern("claude-opus-4", "*opus-4"));
        assert!(!model_matches_pattern("claude-opus-4-1", "*opus-4"));
    }
}
