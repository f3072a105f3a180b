use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, Statement, params};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracker_core::{Channel, EventStatus, EventType, TelemetryEvent, TokenCounters};

use super::SourceAdapter;
use crate::fields::{find_f64, find_string, find_timestamp, find_u64, lookup, timestamp_from_epoch};
use crate::types::{Collection, IngestError, OPT_DB_PATH, Result, SourceOptions};

const SYSTEM: &str = "opencode";

/// OpenCode: message and part rows in its local SQLite database.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCodeAdapter;

#[derive(Debug, Clone, Default)]
struct ParentMessage {
    model: Option<String>,
    provider: Option<String>,
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn known_tables(conn: &Connection) -> Result<(bool, bool)> {
    Ok((table_exists(conn, "message")?, table_exists(conn, "part")?))
}

fn row_time(data: &Value, paths: &[&[&str]], updated_ms: Option<i64>) -> Option<DateTime<Utc>> {
    find_timestamp(data, paths).or_else(|| updated_ms.and_then(timestamp_from_epoch))
}

fn message_counters(data: &Value) -> Option<TokenCounters> {
    let tokens = lookup(data, &["tokens"]).filter(|tokens| tokens.is_object())?;
    Some(TokenCounters {
        input_tokens: find_u64(tokens, &[&["input"]]).unwrap_or(0),
        output_tokens: find_u64(tokens, &[&["output"]]).unwrap_or(0),
        reasoning_tokens: find_u64(tokens, &[&["reasoning"]]).unwrap_or(0),
        cache_read_tokens: find_u64(tokens, &[&["cache", "read"]]).unwrap_or(0),
        cache_write_tokens: find_u64(tokens, &[&["cache", "write"]]).unwrap_or(0),
    })
}

fn message_event(
    id: &str,
    session_id: Option<String>,
    updated_ms: Option<i64>,
    data: &Value,
) -> Option<TelemetryEvent> {
    if find_string(data, &[&["role"]]).as_deref() != Some("assistant") {
        return None;
    }
    let counters = message_counters(data)?;
    let occurred_at = row_time(
        data,
        &[&["time", "completed"], &["time", "created"]],
        updated_ms,
    )?;
    let mut event = TelemetryEvent::new(
        Channel::EmbeddedDb,
        EventType::MessageUsage,
        occurred_at,
        SYSTEM,
    );
    event.message_id = Some(id.to_string());
    event.session_id = find_string(data, &[&["sessionID"]]).or(session_id);
    event.workspace_id = find_string(data, &[&["path", "cwd"], &["path", "root"]]);
    event.model_raw = find_string(data, &[&["modelID"], &["model"]]);
    event.provider_id = find_string(data, &[&["providerID"]]);
    event.set_counters(counters);
    event.cost_usd = find_f64(data, &[&["cost"]]);
    event.requests = Some(1);
    event.status = if lookup(data, &["error"]).is_some_and(|error| !error.is_null()) {
        EventStatus::Error
    } else if lookup(data, &["time", "completed"]).is_some() {
        EventStatus::Ok
    } else {
        EventStatus::Unknown
    };
    Some(event)
}

fn tool_status(data: &Value) -> EventStatus {
    match find_string(data, &[&["state", "status"]]).as_deref() {
        Some("completed") => EventStatus::Ok,
        Some("error") => EventStatus::Error,
        _ => EventStatus::Unknown,
    }
}

struct MessageRow {
    id: String,
    session_id: Option<String>,
    updated_ms: Option<i64>,
    data: Option<String>,
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        updated_ms: row.get(2)?,
        data: row.get(3)?,
    })
}

struct PartRow {
    id: String,
    message_id: Option<String>,
    session_id: Option<String>,
    updated_ms: Option<i64>,
    data: Option<String>,
}

fn part_row(row: &Row<'_>) -> rusqlite::Result<PartRow> {
    Ok(PartRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        session_id: row.get(2)?,
        updated_ms: row.get(3)?,
        data: row.get(4)?,
    })
}

fn parse_data(raw: Option<String>) -> Option<Value> {
    raw.and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
}

struct Scan<'a> {
    conn: &'a Connection,
    cancel: &'a CancellationToken,
    db_path: String,
    out: Collection,
}

impl<'a> Scan<'a> {
    fn new(conn: &'a Connection, cancel: &'a CancellationToken, path: &Path) -> Self {
        Self {
            conn,
            cancel,
            db_path: path.to_string_lossy().into_owned(),
            out: Collection {
                files_scanned: 1,
                bytes_read: std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0),
                ..Collection::default()
            },
        }
    }

    /// A row that cannot be decoded is skipped; the rest of the table is still read.
    fn skip_row(&mut self, table: &str, err: rusqlite::Error) {
        debug!(table, error = %err, "opencode row skipped");
        self.out.records_skipped += 1;
        let path = self.db_path.clone();
        self.out.issue(SYSTEM, path, format!("{table} row skipped: {err}"));
    }

    fn table_failed(&mut self, table: &str, err: IngestError) {
        warn!(db = %self.db_path, table, error = %err, "opencode table unreadable");
        let path = self.db_path.clone();
        self.out.issue(SYSTEM, path, format!("{table} table unreadable: {err}"));
    }

    fn read_messages(&mut self) -> Result<()> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, time_updated, data FROM message ORDER BY time_updated, id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if self.cancel.is_cancelled() {
                self.out.cancelled = true;
                break;
            }
            self.out.records_read += 1;
            let message = match message_row(row) {
                Ok(message) => message,
                Err(err) => {
                    self.skip_row("message", err);
                    continue;
                }
            };
            let Some(data) = parse_data(message.data) else {
                self.out.records_skipped += 1;
                continue;
            };
            if let Some(event) =
                message_event(&message.id, message.session_id, message.updated_ms, &data)
            {
                self.out.events.push(event);
            }
        }
        Ok(())
    }

    fn parent(
        &self,
        parent_stmt: &mut Statement<'_>,
        parents: &mut HashMap<String, ParentMessage>,
        message_id: &str,
    ) -> ParentMessage {
        if let Some(parent) = parents.get(message_id) {
            return parent.clone();
        }
        let found = parent_stmt
            .query_row(params![message_id], |row| row.get::<_, Option<String>>(0))
            .optional();
        let parent = match found {
            Ok(raw) => parse_data(raw.flatten())
                .map(|data| ParentMessage {
                    model: find_string(&data, &[&["modelID"], &["model"]]),
                    provider: find_string(&data, &[&["providerID"]]),
                })
                .unwrap_or_default(),
            Err(err) => {
                warn!(db = %self.db_path, message_id, error = %err, "opencode parent message unreadable");
                ParentMessage::default()
            }
        };
        parents.insert(message_id.to_string(), parent.clone());
        parent
    }

    fn read_tool_parts(&mut self, has_messages: bool) -> Result<()> {
        let conn = self.conn;
        let mut parents: HashMap<String, ParentMessage> = HashMap::new();
        let mut parent_stmt = if has_messages {
            Some(conn.prepare("SELECT data FROM message WHERE id = ?1")?)
        } else {
            None
        };
        let mut stmt = conn.prepare(
            "SELECT id, message_id, session_id, time_updated, data FROM part ORDER BY time_updated, id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if self.cancel.is_cancelled() {
                self.out.cancelled = true;
                break;
            }
            self.out.records_read += 1;
            let part = match part_row(row) {
                Ok(part) => part,
                Err(err) => {
                    self.skip_row("part", err);
                    continue;
                }
            };
            let Some(data) = parse_data(part.data) else {
                self.out.records_skipped += 1;
                continue;
            };
            if find_string(&data, &[&["type"]]).as_deref() != Some("tool") {
                continue;
            }
            let Some(occurred_at) = row_time(
                &data,
                &[&["state", "time", "end"], &["state", "time", "start"]],
                part.updated_ms,
            ) else {
                self.out.records_skipped += 1;
                continue;
            };
            let message_id = find_string(&data, &[&["messageID"]]).or(part.message_id);
            let parent = match (&message_id, parent_stmt.as_mut()) {
                (Some(message_id), Some(parent_stmt)) => {
                    self.parent(parent_stmt, &mut parents, message_id)
                }
                _ => ParentMessage::default(),
            };

            let mut event =
                TelemetryEvent::new(Channel::EmbeddedDb, EventType::ToolUsage, occurred_at, SYSTEM);
            event.session_id = find_string(&data, &[&["sessionID"]]).or(part.session_id);
            event.message_id = message_id;
            event.model_raw = parent.model;
            event.provider_id = parent.provider;
            event.tool_name = find_string(&data, &[&["tool"]]);
            event.tool_call_id = find_string(&data, &[&["callID"]]).or(Some(part.id));
            event.status = tool_status(&data);
            self.out.events.push(event);
        }
        Ok(())
    }
}

fn unreadable(path: &Path, err: impl std::fmt::Display) -> Collection {
    warn!(db = %path.display(), error = %err, "opencode database unreadable");
    let mut out = Collection {
        files_skipped: 1,
        ..Collection::default()
    };
    out.issue(SYSTEM, path.to_string_lossy(), err);
    out
}

fn scan_database(path: &Path, cancel: &CancellationToken) -> Collection {
    let conn = match Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    ) {
        Ok(conn) => conn,
        Err(err) => return unreadable(path, err),
    };
    let (has_messages, has_parts) = match known_tables(&conn) {
        Ok(tables) => tables,
        Err(err) => return unreadable(path, err),
    };

    let mut scan = Scan::new(&conn, cancel, path);
    if has_messages {
        if let Err(err) = scan.read_messages() {
            scan.table_failed("message", err);
        }
    } else {
        debug!("opencode message table missing");
    }
    if scan.out.cancelled || cancel.is_cancelled() {
        scan.out.cancelled = true;
        return scan.out;
    }
    if has_parts {
        if let Err(err) = scan.read_tool_parts(has_messages) {
            scan.table_failed("part", err);
        }
    } else {
        debug!("opencode part table missing");
    }
    scan.out
}

impl SourceAdapter for OpenCodeAdapter {
    fn system(&self) -> &'static str {
        SYSTEM
    }

    fn collect(&self, options: &SourceOptions, cancel: &CancellationToken) -> Collection {
        let Some(path) = options.path(OPT_DB_PATH) else {
            return Collection::default();
        };
        if !path.is_file() {
            debug!(db = %path.display(), "opencode database missing, nothing to read");
            return Collection::default();
        }
        scan_database(&path, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(path: &Path) {
        let conn = Connection::open(path).expect("open");
        conn.execute_batch(
            r#"
            CREATE TABLE message (id TEXT PRIMARY KEY, session_id TEXT, time_created INTEGER, time_updated INTEGER, data TEXT);
            CREATE TABLE part (id TEXT PRIMARY KEY, message_id TEXT, session_id TEXT, time_created INTEGER, time_updated INTEGER, data TEXT);
            "#,
        )
        .expect("schema");
        conn.execute(
            "INSERT INTO message VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                "msg_1",
                "ses_1",
                1735725600000i64,
                1735725601000i64,
                r#"{"role":"assistant","modelID":"claude-sonnet-4","providerID":"anthropic","cost":0.02,"time":{"created":1735725600000,"completed":1735725601000},"tokens":{"input":10,"output":20,"reasoning":5,"cache":{"read":100,"write":0}}}"#
            ],
        )
        .expect("insert");
        conn.execute(
            "INSERT INTO message VALUES (?1, ?2, ?3, ?4, ?5)",
            params!["msg_0", "ses_1", 1735725500000i64, 1735725500000i64, r#"{"role":"user"}"#],
        )
        .expect("insert");
        conn.execute(
            "INSERT INTO part VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                "prt_1",
                "msg_1",
                "ses_1",
                1735725600500i64,
                1735725600500i64,
                r#"{"type":"tool","callID":"call_a","tool":"bash","state":{"status":"completed"}}"#
            ],
        )
        .expect("insert");
        conn.execute(
            "INSERT INTO part VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params!["prt_2", "msg_1", "ses_1", 1735725600600i64, 1735725600600i64, "{broken"],
        )
        .expect("insert");
    }

    #[test]
    fn reads_messages_and_tool_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("opencode.db");
        seed(&db);
        let options = SourceOptions::new().with(OPT_DB_PATH, db.to_string_lossy());
        let out = OpenCodeAdapter.collect(&options, &CancellationToken::new());
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        assert_eq!(out.events.len(), 2);
        let usage = &out.events[0];
        assert_eq!(usage.event_type, EventType::MessageUsage);
        assert_eq!(usage.channel, Channel::EmbeddedDb);
        assert_eq!(usage.session_id.as_deref(), Some("ses_1"));
        assert_eq!(usage.total_tokens, Some(135));
        assert_eq!(usage.cost_usd, Some(0.02));
        assert_eq!(usage.status, EventStatus::Ok);
        let tool = &out.events[1];
        assert_eq!(tool.event_type, EventType::ToolUsage);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(tool.model_raw.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(tool.status, EventStatus::Ok);
        assert_eq!(out.records_skipped, 1);
    }

    #[test]
    fn missing_tables_are_no_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("empty.db");
        Connection::open(&db)
            .expect("open")
            .execute_batch("CREATE TABLE other (id INTEGER);")
            .expect("schema");
        let options = SourceOptions::new().with(OPT_DB_PATH, db.to_string_lossy());
        let out = OpenCodeAdapter.collect(&options, &CancellationToken::new());
        assert!(out.events.is_empty());
        assert!(out.issues.is_empty());
    }

    #[test]
    fn missing_database_is_no_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options =
            SourceOptions::new().with(OPT_DB_PATH, dir.path().join("nope.db").to_string_lossy());
        let out = OpenCodeAdapter.collect(&options, &CancellationToken::new());
        assert_eq!(out.files_scanned, 0);
        assert!(out.issues.is_empty());
        assert!(!dir.path().join("nope.db").exists());
    }

    fn assistant(completed_ms: i64) -> String {
        format!(
            r#"{{"role":"assistant","modelID":"claude-sonnet-4","time":{{"completed":{completed_ms}}},"tokens":{{"input":1,"output":2}}}}"#
        )
    }

    #[test]
    fn undecodable_row_is_skipped_and_the_table_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("opencode.db");
        let conn = Connection::open(&db).expect("open");
        conn.execute_batch(
            "CREATE TABLE message (id TEXT PRIMARY KEY, session_id TEXT, time_updated INTEGER, data TEXT);",
        )
        .expect("schema");
        let insert = "INSERT INTO message (id, session_id, time_updated, data) VALUES (?1, ?2, ?3, ?4)";
        conn.execute(insert, params!["msg_a", "ses_1", 1000i64, assistant(1000)])
            .expect("insert");
        // a blob session id cannot be read as text
        conn.execute(insert, params!["msg_b", vec![0u8, 159, 146], 2000i64, assistant(2000)])
            .expect("insert");
        conn.execute(insert, params!["msg_c", "ses_1", 3000i64, assistant(3000)])
            .expect("insert");
        conn.execute(insert, params!["msg_d", "ses_1", "later", assistant(4000)])
            .expect("insert");
        drop(conn);

        let options = SourceOptions::new().with(OPT_DB_PATH, db.to_string_lossy());
        let out = OpenCodeAdapter.collect(&options, &CancellationToken::new());
        let ids: Vec<_> = out
            .events
            .iter()
            .filter_map(|event| event.message_id.as_deref())
            .collect();
        assert_eq!(ids, ["msg_a", "msg_c"]);
        assert_eq!(out.records_read, 4);
        assert_eq!(out.records_skipped, 2);
        assert_eq!(out.files_skipped, 0);
        assert_eq!(out.issues.len(), 2);
        assert!(
            out.issues
                .iter()
                .all(|issue| issue.message.starts_with("message row skipped"))
        );
    }

    #[test]
    fn unreadable_message_table_still_reads_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("opencode.db");
        let conn = Connection::open(&db).expect("open");
        conn.execute_batch(
            r#"
            CREATE TABLE message (id TEXT PRIMARY KEY, time_updated INTEGER, data TEXT);
            CREATE TABLE part (id TEXT PRIMARY KEY, message_id TEXT, session_id TEXT, time_updated INTEGER, data TEXT);
            "#,
        )
        .expect("schema");
        conn.execute(
            "INSERT INTO message VALUES (?1, ?2, ?3)",
            params!["msg_1", 1000i64, assistant(1000)],
        )
        .expect("insert");
        conn.execute(
            "INSERT INTO part VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                "prt_1",
                "msg_1",
                "ses_1",
                1500i64,
                r#"{"type":"tool","tool":"read","state":{"status":"error"}}"#
            ],
        )
        .expect("insert");
        drop(conn);

        let options = SourceOptions::new().with(OPT_DB_PATH, db.to_string_lossy());
        let out = OpenCodeAdapter.collect(&options, &CancellationToken::new());
        assert_eq!(out.issues.len(), 1);
        assert!(out.issues[0].message.starts_with("message table unreadable"));
        assert_eq!(out.events.len(), 1);
        let tool = &out.events[0];
        assert_eq!(tool.event_type, EventType::ToolUsage);
        assert_eq!(tool.tool_call_id.as_deref(), Some("prt_1"));
        assert_eq!(tool.model_raw.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(tool.status, EventStatus::Error);
    }

    #[test]
    fn cancellation_between_tables_keeps_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("opencode.db");
        seed(&db);
        let conn = Connection::open(&db).expect("open");
        let cancel = CancellationToken::new();
        let mut scan = Scan::new(&conn, &cancel, &db);

        scan.read_messages().expect("messages");
        cancel.cancel();
        scan.read_tool_parts(true).expect("parts");

        assert!(scan.out.cancelled);
        assert_eq!(scan.out.records_read, 2);
        assert_eq!(scan.out.events.len(), 1);
        assert_eq!(scan.out.events[0].event_type, EventType::MessageUsage);
    }

    #[test]
    fn cancelled_before_start_reads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("opencode.db");
        seed(&db);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = SourceOptions::new().with(OPT_DB_PATH, db.to_string_lossy());
        let out = OpenCodeAdapter.collect(&options, &cancel);
        assert!(out.cancelled);
        assert!(out.events.is_empty());
        assert_eq!(out.records_read, 0);
    }
}
