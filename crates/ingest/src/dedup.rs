use std::collections::HashSet;
use std::fmt::Write;

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};
use tracker_core::{EventType, TelemetryEvent};

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{:02x}", byte);
    }
    out
}

fn optional_count(value: Option<u64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

fn usage_fingerprint(event: &TelemetryEvent, session_id: &str) -> String {
    let parts = [
        session_id.to_string(),
        event
            .occurred_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        present(&event.model_raw).unwrap_or_default().to_string(),
        optional_count(event.input_tokens),
        optional_count(event.output_tokens),
        optional_count(event.cache_read_tokens),
        optional_count(event.cache_write_tokens),
    ];
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex_digest(&hasher.finalize())
}

/// Stable identity of an event. Usage events always get a key, falling back
/// to a content fingerprint. An empty key means the event cannot be
/// deduplicated and is always kept.
pub fn dedup_key(event: &TelemetryEvent) -> String {
    match event.event_type {
        EventType::MessageUsage => {
            if let Some(request_id) = present(&event.request_id) {
                return format!("usage:req:{request_id}");
            }
            if let Some(message_id) = present(&event.message_id) {
                return format!("usage:msg:{message_id}");
            }
            let session_id = present(&event.session_id).unwrap_or_default();
            format!("usage:fp:{}", usage_fingerprint(event, session_id))
        }
        EventType::ToolUsage => {
            if let Some(call_id) = present(&event.tool_call_id) {
                return format!("tool:call:{call_id}");
            }
            let anchor = present(&event.message_id).or_else(|| present(&event.request_id));
            match (anchor, present(&event.tool_name)) {
                (Some(anchor), Some(tool_name)) => format!(
                    "tool:pos:{anchor}:{tool_name}:{}",
                    event.tool_call_index.unwrap_or(0)
                ),
                _ => String::new(),
            }
        }
        EventType::TurnCompleted | EventType::RawEnvelope => String::new(),
    }
}

/// Keys seen during one collection run. First occurrence wins.
#[derive(Debug, Default)]
pub struct DedupCache {
    seen: HashSet<String>,
    dropped: usize,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the event should be kept.
    pub fn admit(&mut self, event: &TelemetryEvent) -> bool {
        let key = dedup_key(event);
        if key.is_empty() || self.seen.insert(key) {
            return true;
        }
        self.dropped += 1;
        false
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

pub fn dedup_events<I>(events: I, cache: &mut DedupCache) -> Vec<TelemetryEvent>
where
    I: IntoIterator<Item = TelemetryEvent>,
{
    events
        .into_iter()
        .filter(|event| cache.admit(event))
        .collect()
}
