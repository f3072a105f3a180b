use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::lines::{BoundedLines, Line};
use crate::types::Collection;

/// What a per-file scanner knows about the file it is reading.
pub(crate) struct FileContext {
    pub file_path: String,
    /// Session id derived from the file name, used when records carry none.
    pub session_id: String,
}

/// Per-file state machine fed one decoded record at a time.
pub(crate) trait RecordHandler {
    fn on_record(&mut self, record: &Value, ctx: &FileContext, out: &mut Collection);
}

fn is_log_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|value| value.to_str()),
        Some("jsonl") | Some("ndjson")
    )
}

fn discover(system: &str, root: &Path, out: &mut Collection) -> Vec<PathBuf> {
    if root.is_file() {
        return if is_log_path(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        };
    }
    if !root.is_dir() {
        debug!(system, root = %root.display(), "log root missing, nothing to read");
        return Vec::new();
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let file_path = err
                    .path()
                    .map(|path| path.to_string_lossy().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                out.issue(system, file_path, &err);
                continue;
            }
        };
        if entry.file_type().is_file() && is_log_path(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    paths
}

fn scan_file<H: RecordHandler>(
    system: &str,
    path: &Path,
    mut handler: H,
    cancel: &CancellationToken,
) -> Collection {
    let mut out = Collection::default();
    let file_path = path.to_string_lossy().to_string();
    if cancel.is_cancelled() {
        out.cancelled = true;
        return out;
    }
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!(system, file = %file_path, error = %err, "unreadable log file");
            out.files_skipped += 1;
            out.issue(system, file_path, &err);
            return out;
        }
    };
    out.files_scanned += 1;
    let ctx = FileContext {
        session_id: tracker_core::session_id_from_source(&file_path),
        file_path,
    };
    let mut lines = BoundedLines::new(BufReader::new(file));
    loop {
        if cancel.is_cancelled() {
            out.cancelled = true;
            break;
        }
        let Some(item) = lines.next() else {
            break;
        };
        let (line_number, line) = match item {
            Ok(item) => item,
            Err(err) => {
                out.issue(system, ctx.file_path.clone(), &err);
                break;
            }
        };
        let text = match line {
            Line::Text(text) => text,
            Line::Oversized(len) => {
                out.records_skipped += 1;
                out.issue(
                    system,
                    ctx.file_path.clone(),
                    format!("line {line_number} skipped: {len} bytes exceeds the line limit"),
                );
                continue;
            }
            Line::InvalidUtf8 => {
                out.records_skipped += 1;
                out.issue(
                    system,
                    ctx.file_path.clone(),
                    format!("line {line_number} skipped: invalid utf-8"),
                );
                continue;
            }
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.records_read += 1;
        match serde_json::from_str::<Value>(trimmed) {
            Ok(record) if record.is_object() => handler.on_record(&record, &ctx, &mut out),
            _ => out.records_skipped += 1,
        }
    }
    out.bytes_read = lines.bytes_read();
    debug!(
        system,
        file = %ctx.file_path,
        events = out.events.len(),
        bytes = out.bytes_read,
        "scanned log file"
    );
    out
}

/// Scans every line-delimited file under `root` in parallel with a fresh
/// handler per file; results are merged in path order.
pub(crate) fn scan_tree<H, F>(
    system: &str,
    root: &Path,
    cancel: &CancellationToken,
    make_handler: F,
) -> Collection
where
    H: RecordHandler,
    F: Fn() -> H + Sync,
{
    let mut collection = Collection::default();
    let paths = discover(system, root, &mut collection);
    let parsed = paths
        .par_iter()
        .map(|path| scan_file(system, path, make_handler(), cancel))
        .collect::<Vec<_>>();
    for file in parsed {
        collection.absorb(file);
    }
    collection
}
