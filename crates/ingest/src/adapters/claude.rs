use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracker_core::{Channel, EventStatus, EventType, TelemetryEvent, TokenCounters};

use super::SourceAdapter;
use super::jsonl::{FileContext, RecordHandler, scan_tree};
use crate::fields::{find_bool, find_f64, find_string, find_timestamp, find_u64, lookup};
use crate::types::{Collection, HookOutcome, OPT_PROJECTS_DIR, Result, SourceOptions};

const SYSTEM: &str = "claude";
const PROVIDER: &str = "anthropic";
const SYNTHETIC_MODEL: &str = "<synthetic>";

/// Claude Code: per-project JSONL transcripts plus hook callbacks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeAdapter;

fn usage_counters(usage: &Value) -> Option<TokenCounters> {
    let input = find_u64(usage, &[&["input_tokens"], &["inputTokens"]]);
    let output = find_u64(usage, &[&["output_tokens"], &["outputTokens"]]);
    let cache_read = find_u64(
        usage,
        &[&["cache_read_input_tokens"], &["cacheReadInputTokens"]],
    );
    let cache_write = find_u64(
        usage,
        &[
            &["cache_creation_input_tokens"],
            &["cacheCreationInputTokens"],
        ],
    );
    if input.is_none() && output.is_none() && cache_read.is_none() && cache_write.is_none() {
        return None;
    }
    Some(TokenCounters {
        input_tokens: input.unwrap_or(0),
        output_tokens: output.unwrap_or(0),
        reasoning_tokens: 0,
        cache_read_tokens: cache_read.unwrap_or(0),
        cache_write_tokens: cache_write.unwrap_or(0),
    })
}

fn usable_model(model: Option<String>) -> Option<String> {
    model.filter(|model| model != SYNTHETIC_MODEL)
}

#[derive(Default)]
struct TranscriptScanner {
    current_model: Option<String>,
    tool_positions: HashMap<String, u32>,
}

impl TranscriptScanner {
    fn next_tool_index(&mut self, anchor: Option<&str>) -> u32 {
        let key = anchor.unwrap_or_default().to_string();
        let slot = self.tool_positions.entry(key).or_insert(0);
        let index = *slot;
        *slot += 1;
        index
    }
}

impl RecordHandler for TranscriptScanner {
    fn on_record(&mut self, record: &Value, ctx: &FileContext, out: &mut Collection) {
        if let Some(model) = usable_model(find_string(record, &[&["message", "model"]])) {
            self.current_model = Some(model);
        }
        if find_string(record, &[&["type"]]).as_deref() != Some("assistant") {
            return;
        }
        let Some(occurred_at) = find_timestamp(record, &[&["timestamp"]]) else {
            out.records_skipped += 1;
            return;
        };

        let mut base = TelemetryEvent::new(
            Channel::LineDelimitedLog,
            EventType::MessageUsage,
            occurred_at,
            SYSTEM,
        );
        base.session_id = find_string(record, &[&["sessionId"], &["session_id"]])
            .or_else(|| Some(ctx.session_id.clone()));
        base.turn_id = find_string(record, &[&["uuid"]]);
        base.message_id = find_string(record, &[&["message", "id"]]);
        base.request_id = find_string(record, &[&["requestId"], &["request_id"]]);
        base.workspace_id = find_string(record, &[&["cwd"]]);
        base.provider_id = Some(PROVIDER.to_string());
        base.model_raw = self.current_model.clone();
        let failed = find_bool(record, &[&["isApiErrorMessage"]]).unwrap_or(false);

        if let Some(counters) = lookup(record, &["message", "usage"]).and_then(usage_counters) {
            let mut usage = base.clone();
            usage.set_counters(counters);
            usage.requests = Some(1);
            usage.cost_usd = find_f64(record, &[&["costUSD"], &["cost_usd"]]);
            usage.status = if failed {
                EventStatus::Error
            } else {
                EventStatus::Ok
            };
            out.events.push(usage);
        }

        let Some(blocks) = lookup(record, &["message", "content"]).and_then(Value::as_array) else {
            return;
        };
        let anchor = base.message_id.clone().or_else(|| base.request_id.clone());
        for block in blocks {
            if find_string(block, &[&["type"]]).as_deref() != Some("tool_use") {
                continue;
            }
            let mut tool = base.clone();
            tool.event_type = EventType::ToolUsage;
            tool.tool_name = find_string(block, &[&["name"]]);
            tool.tool_call_id = find_string(block, &[&["id"]]);
            tool.tool_call_index = Some(self.next_tool_index(anchor.as_deref()));
            out.events.push(tool);
        }
    }
}

fn hook_event_type(hook_name: &str, payload: &Value) -> EventType {
    match hook_name {
        "PreToolUse" | "PostToolUse" | "PostToolUseFailure" => EventType::ToolUsage,
        "Stop" | "SubagentStop" => EventType::TurnCompleted,
        _ if lookup(payload, &["usage"]).is_some_and(Value::is_object) => EventType::MessageUsage,
        _ => EventType::RawEnvelope,
    }
}

fn hook_status(hook_name: &str, payload: &Value) -> EventStatus {
    let errored = hook_name == "PostToolUseFailure"
        || find_bool(
            payload,
            &[&["tool_response", "is_error"], &["is_error"], &["error"]],
        )
        .unwrap_or(false);
    if errored {
        return EventStatus::Error;
    }
    match hook_name {
        "PostToolUse" | "Stop" | "SubagentStop" => EventStatus::Ok,
        _ => EventStatus::Unknown,
    }
}

fn hook_event(payload: &Value, now: DateTime<Utc>) -> TelemetryEvent {
    let hook_name = find_string(payload, &[&["hook_event_name"], &["hookEventName"]])
        .unwrap_or_default();
    let event_type = hook_event_type(&hook_name, payload);
    let occurred_at = find_timestamp(payload, &[&["timestamp"], &["time"]]).unwrap_or(now);
    let mut event = TelemetryEvent::new(Channel::Hook, event_type, occurred_at, SYSTEM);
    event.session_id = find_string(payload, &[&["session_id"], &["sessionId"]]);
    event.workspace_id = find_string(payload, &[&["cwd"]]);
    event.provider_id = Some(PROVIDER.to_string());
    event.model_raw = usable_model(find_string(payload, &[&["model"], &["message", "model"]]));
    event.status = hook_status(&hook_name, payload);
    match event_type {
        EventType::ToolUsage => {
            event.tool_name = find_string(payload, &[&["tool_name"], &["toolName"]]);
            event.tool_call_id = find_string(payload, &[&["tool_use_id"], &["toolUseId"]]);
        }
        EventType::MessageUsage => {
            if let Some(counters) = lookup(payload, &["usage"]).and_then(usage_counters) {
                event.set_counters(counters);
            }
            event.message_id = find_string(payload, &[&["message_id"], &["message", "id"]]);
            event.request_id = find_string(payload, &[&["request_id"], &["requestId"]]);
            event.cost_usd = find_f64(payload, &[&["cost_usd"], &["costUSD"]]);
            event.requests = Some(1);
        }
        EventType::TurnCompleted | EventType::RawEnvelope => {}
    }
    if let Value::Object(map) = payload {
        event.payload = map.clone();
    }
    event
}

impl SourceAdapter for ClaudeAdapter {
    fn system(&self) -> &'static str {
        SYSTEM
    }

    fn collect(&self, options: &SourceOptions, cancel: &CancellationToken) -> Collection {
        let Some(root) = options.path(OPT_PROJECTS_DIR) else {
            return Collection::default();
        };
        scan_tree(SYSTEM, &root, cancel, TranscriptScanner::default)
    }

    fn parse_hook_payload(&self, raw: &[u8], _options: &SourceOptions) -> Result<HookOutcome> {
        let payload: Value = serde_json::from_slice(raw)?;
        Ok(HookOutcome::Events(vec![hook_event(&payload, Utc::now())]))
    }
}
