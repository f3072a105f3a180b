use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracker_core::{Channel, EventStatus, EventType, TelemetryEvent, TokenCounters};

use super::SourceAdapter;
use super::jsonl::{FileContext, RecordHandler, scan_tree};
use crate::delta::CounterDeltas;
use crate::fields::{find_string, find_timestamp, find_u64, lookup};
use crate::limits::extract_limit_snapshots;
use crate::types::{Collection, HookOutcome, OPT_SESSIONS_DIR, Result, SourceOptions};

const SYSTEM: &str = "codex";
const DEFAULT_PROVIDER: &str = "openai";

/// Codex CLI: rollout files carrying cumulative token counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodexAdapter;

/// Raw counters as codex reports them: cached input is part of input and
/// reasoning is part of output.
fn raw_counters(usage: &Value) -> Option<TokenCounters> {
    let input = find_u64(usage, &[&["input_tokens"]]);
    let output = find_u64(usage, &[&["output_tokens"]]);
    if input.is_none() && output.is_none() {
        return None;
    }
    Some(TokenCounters {
        input_tokens: input.unwrap_or(0),
        output_tokens: output.unwrap_or(0),
        reasoning_tokens: find_u64(usage, &[&["reasoning_output_tokens"], &["reasoning_tokens"]])
            .unwrap_or(0),
        cache_read_tokens: find_u64(usage, &[&["cached_input_tokens"], &["cache_read_input_tokens"]])
            .unwrap_or(0),
        cache_write_tokens: 0,
    })
}

fn canonical(raw: TokenCounters) -> TokenCounters {
    TokenCounters {
        input_tokens: raw.input_tokens.saturating_sub(raw.cache_read_tokens),
        output_tokens: raw.output_tokens.saturating_sub(raw.reasoning_tokens),
        ..raw
    }
}

fn record_time(record: &Value) -> Option<DateTime<Utc>> {
    find_timestamp(record, &[&["timestamp"], &["payload", "timestamp"]])
}

#[derive(Default)]
struct RolloutScanner {
    session_id: Option<String>,
    workspace_id: Option<String>,
    provider_id: Option<String>,
    current_model: Option<String>,
    turn_id: Option<String>,
    tool_index: u32,
    deltas: CounterDeltas,
}

impl RolloutScanner {
    fn event(&self, ctx: &FileContext, event_type: EventType, record: &Value) -> Option<TelemetryEvent> {
        let occurred_at = record_time(record)?;
        Some(self.event_at(ctx, event_type, occurred_at))
    }

    fn event_at(&self, ctx: &FileContext, event_type: EventType, occurred_at: DateTime<Utc>) -> TelemetryEvent {
        let mut event = TelemetryEvent::new(Channel::LineDelimitedLog, event_type, occurred_at, SYSTEM);
        event.session_id = self.session_id.clone().or_else(|| Some(ctx.session_id.clone()));
        event.workspace_id = self.workspace_id.clone();
        event.provider_id = self
            .provider_id
            .clone()
            .or_else(|| Some(DEFAULT_PROVIDER.to_string()));
        event.model_raw = self.current_model.clone();
        event.turn_id = self.turn_id.clone();
        event
    }

    fn stream_key(&self, ctx: &FileContext) -> String {
        self.session_id.clone().unwrap_or_else(|| ctx.session_id.clone())
    }

    fn on_session_meta(&mut self, payload: &Value) {
        if let Some(id) = find_string(payload, &[&["id"], &["session_id"]]) {
            self.session_id = Some(id);
        }
        if let Some(cwd) = find_string(payload, &[&["cwd"]]) {
            self.workspace_id = Some(cwd);
        }
        if let Some(provider) = find_string(payload, &[&["model_provider"], &["provider"]]) {
            self.provider_id = Some(provider);
        }
        if let Some(model) = find_string(payload, &[&["model"]]) {
            self.current_model = Some(model);
        }
    }

    fn on_turn_context(&mut self, payload: &Value) {
        if let Some(model) = find_string(payload, &[&["model"]]) {
            self.current_model = Some(model);
        }
        if let Some(cwd) = find_string(payload, &[&["cwd"]]) {
            self.workspace_id = Some(cwd);
        }
        let turn_id = find_string(payload, &[&["turn_id"], &["turnId"]]);
        if turn_id.is_none() || turn_id != self.turn_id {
            self.tool_index = 0;
        }
        self.turn_id = turn_id;
    }

    fn on_token_count(&mut self, record: &Value, ctx: &FileContext, out: &mut Collection) {
        // Snapshots are only recorded once the record is known to be usable.
        let Some(occurred_at) = record_time(record) else {
            out.records_skipped += 1;
            return;
        };
        let info = lookup(record, &["payload", "info"]).filter(|info| info.is_object());
        let delta = match info {
            Some(info) => {
                if let Some(snapshot) = lookup(info, &["total_token_usage"]).and_then(raw_counters) {
                    let stream = self.stream_key(ctx);
                    self.deltas.observe(&stream, snapshot)
                } else {
                    lookup(info, &["last_token_usage"])
                        .and_then(raw_counters)
                        .filter(|counters| !counters.is_zero())
                }
            }
            None => None,
        };
        if let Some(delta) = delta {
            let mut event = self.event_at(ctx, EventType::MessageUsage, occurred_at);
            event.set_counters(canonical(delta));
            event.requests = Some(1);
            event.status = EventStatus::Ok;
            out.events.push(event);
        }
        out.limits
            .extend(extract_limit_snapshots(record, occurred_at, &ctx.file_path));
    }

    fn on_turn_end(&mut self, record: &Value, ctx: &FileContext, out: &mut Collection, status: EventStatus) {
        let Some(mut event) = self.event(ctx, EventType::TurnCompleted, record) else {
            return;
        };
        if let Some(turn_id) = find_string(record, &[&["payload", "turn_id"]]) {
            event.turn_id = Some(turn_id);
        }
        event.status = status;
        out.events.push(event);
    }

    fn on_tool_call(&mut self, record: &Value, kind: &str, ctx: &FileContext, out: &mut Collection) {
        let Some(mut event) = self.event(ctx, EventType::ToolUsage, record) else {
            return;
        };
        let name = find_string(record, &[&["payload", "name"]]).or_else(|| {
            (kind == "local_shell_call").then(|| "local_shell".to_string())
        });
        event.tool_name = name;
        event.tool_call_id = find_string(record, &[&["payload", "call_id"], &["payload", "id"]]);
        event.tool_call_index = Some(self.tool_index);
        self.tool_index += 1;
        out.events.push(event);
    }
}

impl RecordHandler for RolloutScanner {
    fn on_record(&mut self, record: &Value, ctx: &FileContext, out: &mut Collection) {
        let record_type = find_string(record, &[&["type"]]).unwrap_or_default();
        let payload_type = find_string(record, &[&["payload", "type"]]).unwrap_or_default();
        let payload = lookup(record, &["payload"]).unwrap_or(&Value::Null);
        match (record_type.as_str(), payload_type.as_str()) {
            ("session_meta", _) => self.on_session_meta(payload),
            ("turn_context", _) => self.on_turn_context(payload),
            ("event_msg", "token_count") => self.on_token_count(record, ctx, out),
            ("event_msg", "task_complete") => self.on_turn_end(record, ctx, out, EventStatus::Ok),
            ("event_msg", "turn_aborted") => {
                self.on_turn_end(record, ctx, out, EventStatus::Aborted)
            }
            ("response_item", kind @ ("function_call" | "custom_tool_call" | "local_shell_call")) => {
                self.on_tool_call(record, kind, ctx, out)
            }
            _ => {}
        }
    }
}

fn notify_event(payload: &Value) -> TelemetryEvent {
    let kind = find_string(payload, &[&["type"]]).unwrap_or_default();
    let event_type = if kind == "agent-turn-complete" {
        EventType::TurnCompleted
    } else {
        EventType::RawEnvelope
    };
    let occurred_at = find_timestamp(payload, &[&["timestamp"]]).unwrap_or_else(Utc::now);
    let mut event = TelemetryEvent::new(Channel::Hook, event_type, occurred_at, SYSTEM);
    event.session_id = find_string(payload, &[&["thread-id"], &["thread_id"], &["session_id"]]);
    event.turn_id = find_string(payload, &[&["turn-id"], &["turn_id"]]);
    event.workspace_id = find_string(payload, &[&["cwd"]]);
    event.provider_id = Some(DEFAULT_PROVIDER.to_string());
    if event_type == EventType::TurnCompleted {
        event.status = EventStatus::Ok;
    }
    if let Value::Object(map) = payload {
        event.payload = map.clone();
    }
    event
}

impl SourceAdapter for CodexAdapter {
    fn system(&self) -> &'static str {
        SYSTEM
    }

    fn collect(&self, options: &SourceOptions, cancel: &CancellationToken) -> Collection {
        let Some(root) = options.path(OPT_SESSIONS_DIR) else {
            return Collection::default();
        };
        scan_tree(SYSTEM, &root, cancel, RolloutScanner::default)
    }

    fn parse_hook_payload(&self, raw: &[u8], _options: &SourceOptions) -> Result<HookOutcome> {
        let payload: Value = serde_json::from_slice(raw)?;
        Ok(HookOutcome::Events(vec![notify_event(&payload)]))
    }
}
