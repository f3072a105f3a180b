mod adapters;
mod dedup;
mod delta;
pub mod fields;
mod limits;
mod lines;
mod pipeline;
mod types;

pub use adapters::{AdapterRegistry, ClaudeAdapter, CodexAdapter, OpenCodeAdapter, SourceAdapter};
pub use dedup::{DedupCache, dedup_events, dedup_key};
pub use delta::{CounterDeltas, delta_counters};
pub use limits::extract_limit_snapshots;
pub use lines::{BoundedLines, Line, MAX_LINE_BYTES};
pub use pipeline::{collect_sources, parse_hook};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    Collection, HookOutcome, IngestError, IngestIssue, IngestStats, OPT_ACCOUNT_ID, OPT_DB_PATH,
    OPT_PROJECTS_DIR, OPT_SESSIONS_DIR, OPT_SINCE, Result, RunOutput, SourceOptions, SourceSpec,
    SourceStats,
};
