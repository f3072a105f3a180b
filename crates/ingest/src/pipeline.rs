use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};
use tracker_core::TelemetryEvent;

use crate::adapters::AdapterRegistry;
use crate::dedup::DedupCache;
use crate::types::{
    Collection, HookOutcome, IngestError, IngestStats, Result, RunOutput, SourceOptions,
    SourceSpec, SourceStats,
};

fn finish_event(event: &mut TelemetryEvent, account_id: Option<&str>) {
    if event.account_id.is_none()
        && let Some(account_id) = account_id
    {
        event.account_id = Some(account_id.to_string());
    }
    event.normalize_totals();
}

fn collect_one(
    registry: &AdapterRegistry,
    spec: &SourceSpec,
    cancel: &CancellationToken,
) -> Collection {
    let span = info_span!("collect", system = %spec.system);
    let _guard = span.enter();
    let Some(adapter) = registry.get(&spec.system) else {
        warn!("no adapter registered, source skipped");
        let mut out = Collection::default();
        out.issue(
            &spec.system,
            String::new(),
            IngestError::UnknownSystem(spec.system.clone()),
        );
        return out;
    };
    let mut out = adapter.collect(&spec.options, cancel);
    let since = spec.options.since();
    let account_id = spec.options.account_id();
    out.events
        .retain(|event| since.is_none_or(|since| event.occurred_at >= since));
    out.limits
        .retain(|limit| since.is_none_or(|since| limit.observed_at >= since));
    for event in &mut out.events {
        finish_event(event, account_id.as_deref());
    }
    out
}

fn source_stats(system: &str, collection: &Collection, events_emitted: usize) -> SourceStats {
    SourceStats {
        system: system.to_string(),
        files_scanned: collection.files_scanned,
        files_skipped: collection.files_skipped,
        records_read: collection.records_read,
        records_skipped: collection.records_skipped,
        bytes_read: collection.bytes_read,
        events_emitted,
        limit_snapshots: collection.limits.len(),
    }
}

/// Runs every configured source concurrently, then merges their output in
/// configured order and deduplicates it with one run-scoped cache.
///
/// A cancelled run returns [`IngestError::Cancelled`] carrying whatever was
/// collected before the signal.
pub fn collect_sources(
    registry: &AdapterRegistry,
    sources: &[SourceSpec],
    cancel: &CancellationToken,
) -> Result<RunOutput> {
    let collections = sources
        .par_iter()
        .map(|spec| collect_one(registry, spec, cancel))
        .collect::<Vec<_>>();

    let mut output = RunOutput::default();
    let mut stats = IngestStats::default();
    let mut cache = DedupCache::new();
    let mut cancelled = cancel.is_cancelled();
    for (spec, collection) in sources.iter().zip(collections) {
        cancelled |= collection.cancelled;
        stats
            .sources
            .push(source_stats(&spec.system, &collection, collection.events.len()));
        stats.issues.extend(collection.issues);
        output.limits.extend(collection.limits);
        output.events.extend(
            collection
                .events
                .into_iter()
                .filter(|event| cache.admit(event)),
        );
    }
    stats.events_kept = output.events.len();
    stats.duplicates_dropped = cache.dropped();
    info!(
        sources = sources.len(),
        events = stats.events_kept,
        duplicates = stats.duplicates_dropped,
        issues = stats.issues.len(),
        cancelled,
        "collection finished"
    );
    output.stats = stats;
    if cancelled {
        return Err(IngestError::Cancelled(Box::new(output)));
    }
    Ok(output)
}

/// Hands one hook submission to the adapter registered for `system`.
pub fn parse_hook(
    registry: &AdapterRegistry,
    system: &str,
    raw: &[u8],
    options: &SourceOptions,
) -> Result<HookOutcome> {
    let adapter = registry
        .get(system)
        .ok_or_else(|| IngestError::UnknownSystem(system.to_string()))?;
    let outcome = adapter.parse_hook_payload(raw, options)?;
    Ok(match outcome {
        HookOutcome::Events(mut events) => {
            let account_id = options.account_id();
            for event in &mut events {
                finish_event(event, account_id.as_deref());
            }
            HookOutcome::Events(events)
        }
        HookOutcome::Unsupported => HookOutcome::Unsupported,
    })
}
