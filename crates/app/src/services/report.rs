use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use ingest::{CancellationToken, IngestStats, RunOutput};
use serde::Serialize;
use tracing::{info, warn};
use tracker_analytics::{
    BillingBlock, DailyTotals, active_block, daily_totals, identify_blocks, usage_metrics,
};
use tracker_core::{PricingTable, UsageStatus, apply_estimated_costs, derive_status};

use crate::error::Result;
use crate::services::SharedContext;
use crate::services::live::{LiveUsage, LiveUsageError, LiveUsageProvider};

/// Everything the rendering layer needs for one refresh.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub generated_at: DateTime<Utc>,
    pub status: UsageStatus,
    /// Set when the collection run was cancelled before finishing.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_error: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    pub resets: BTreeMap<String, DateTime<Utc>>,
    pub active_block: Option<BillingBlock>,
    pub blocks: Vec<BillingBlock>,
    pub daily: Vec<DailyTotals>,
    pub events_priced: usize,
    pub stats: IngestStats,
}

/// Pure fold from collected output to a report.
pub fn build_report(
    mut output: RunOutput,
    live: Option<std::result::Result<LiveUsage, LiveUsageError>>,
    pricing: &PricingTable,
    block_duration: Duration,
    now: DateTime<Utc>,
    partial: bool,
) -> UsageReport {
    let events_priced = apply_estimated_costs(&mut output.events, pricing);
    let mut status = UsageStatus::Ok;
    let mut live_error = None;
    match live {
        Some(Ok(usage)) => output.limits.extend(usage.limits),
        Some(Err(err)) => {
            warn!(error = %err, "live usage failed, reporting local data only");
            status = err.status();
            live_error = Some(err.to_string());
        }
        None => {}
    }

    let blocks = identify_blocks(&output.events, block_duration);
    let daily = daily_totals(&output.events);
    let active = active_block(&blocks, now).cloned();
    let metrics = usage_metrics(active.as_ref(), &daily, &output.limits, now);
    let status = derive_status(status, &metrics.percentages);

    UsageReport {
        generated_at: now,
        status,
        partial,
        live_error,
        metrics: metrics.metrics,
        resets: metrics.resets,
        active_block: active,
        blocks,
        daily,
        events_priced,
        stats: output.stats,
    }
}

#[derive(Clone)]
pub struct ReportService {
    context: SharedContext,
}

impl ReportService {
    pub(super) fn new(context: SharedContext) -> Self {
        Self { context }
    }

    /// Runs every enabled source. Cancellation surfaces as
    /// `AppError::Ingest(IngestError::Cancelled(..))` with the partial output.
    pub fn collect(&self, cancel: &CancellationToken) -> Result<RunOutput> {
        let specs = self.context.config.source_specs();
        Ok(ingest::collect_sources(
            &self.context.registry,
            &specs,
            cancel,
        )?)
    }

    pub fn build(
        &self,
        output: RunOutput,
        live: Option<&dyn LiveUsageProvider>,
        now: DateTime<Utc>,
        partial: bool,
    ) -> UsageReport {
        let live = live.map(|provider| {
            info!(provider = provider.name(), "fetching live usage");
            provider.fetch()
        });
        build_report(
            output,
            live,
            &self.context.pricing,
            self.context.config.block_duration(),
            now,
            partial,
        )
    }

    pub fn run(
        &self,
        cancel: &CancellationToken,
        live: Option<&dyn LiveUsageProvider>,
        now: DateTime<Utc>,
    ) -> Result<UsageReport> {
        let output = self.collect(cancel)?;
        Ok(self.build(output, live, now, false))
    }
}
