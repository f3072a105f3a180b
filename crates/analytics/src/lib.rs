mod blocks;
mod daily;
pub mod metrics;

pub use blocks::{
    BillingBlock, DEFAULT_BLOCK_HOURS, MIN_BURN_RATE_SECONDS, active_block, burn_rate,
    floor_to_hour, identify_blocks,
};
pub use daily::{DailyTotals, daily_totals};
pub use metrics::{UsageMetrics, current_limits, usage_metrics};
