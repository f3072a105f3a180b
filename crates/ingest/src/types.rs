use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracker_core::{TelemetryEvent, UsageLimitSnapshot};

use crate::fields::parse_timestamp_str;

pub const OPT_PROJECTS_DIR: &str = "projects_dir";
pub const OPT_SESSIONS_DIR: &str = "sessions_dir";
pub const OPT_DB_PATH: &str = "db_path";
pub const OPT_ACCOUNT_ID: &str = "account_id";
pub const OPT_SINCE: &str = "since";

/// Named, already-resolved settings handed to an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceOptions {
    values: BTreeMap<String, String>,
}

impl SourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Trimmed value, empty strings read as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn account_id(&self) -> Option<String> {
        self.get(OPT_ACCOUNT_ID).map(str::to_string)
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.get(OPT_SINCE).and_then(parse_timestamp_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SourceOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = SourceOptions::new();
        for (key, value) in iter {
            options.insert(key, value);
        }
        options
    }
}

/// One configured source in a collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub system: String,
    #[serde(default)]
    pub options: SourceOptions,
}

impl SourceSpec {
    pub fn new(system: impl Into<String>, options: SourceOptions) -> Self {
        Self {
            system: system.into(),
            options,
        }
    }
}

/// Non-fatal issues encountered while collecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestIssue {
    pub system: String,
    pub file_path: String,
    pub message: String,
}

/// Everything one adapter produced from one `collect` call.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub events: Vec<TelemetryEvent>,
    pub limits: Vec<UsageLimitSnapshot>,
    pub issues: Vec<IngestIssue>,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub records_read: usize,
    pub records_skipped: usize,
    pub bytes_read: u64,
    pub cancelled: bool,
}

impl Collection {
    pub(crate) fn issue(&mut self, system: &str, file_path: impl Into<String>, message: impl ToString) {
        self.issues.push(IngestIssue {
            system: system.to_string(),
            file_path: file_path.into(),
            message: message.to_string(),
        });
    }

    pub(crate) fn absorb(&mut self, other: Collection) {
        self.events.extend(other.events);
        self.limits.extend(other.limits);
        self.issues.extend(other.issues);
        self.files_scanned += other.files_scanned;
        self.files_skipped += other.files_skipped;
        self.records_read += other.records_read;
        self.records_skipped += other.records_skipped;
        self.bytes_read = self.bytes_read.saturating_add(other.bytes_read);
        self.cancelled |= other.cancelled;
    }
}

/// Result of handing a single hook payload to an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Events(Vec<TelemetryEvent>),
    /// The source has no hook channel.
    Unsupported,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStats {
    pub system: String,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub records_read: usize,
    pub records_skipped: usize,
    pub bytes_read: u64,
    pub events_emitted: usize,
    pub limit_snapshots: usize,
}

/// Collection summary returned after a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub sources: Vec<SourceStats>,
    pub events_kept: usize,
    pub duplicates_dropped: usize,
    pub issues: Vec<IngestIssue>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub events: Vec<TelemetryEvent>,
    pub limits: Vec<UsageLimitSnapshot>,
    pub stats: IngestStats,
}

/// Errors emitted by the ingest pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid hook payload: {0}")]
    HookPayload(#[from] serde_json::Error),
    #[error("unknown source system: {0}")]
    UnknownSystem(String),
    #[error("collection cancelled with {} events collected", .0.events.len())]
    Cancelled(Box<RunOutput>),
}

impl IngestError {
    /// Partial output of a cancelled run.
    pub fn into_partial(self) -> Option<RunOutput> {
        match self {
            Self::Cancelled(output) => Some(*output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
