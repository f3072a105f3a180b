mod hook;
pub mod live;
mod report;

use std::sync::Arc;

use ingest::AdapterRegistry;
use tracker_core::PricingTable;

use crate::config::AppConfig;

pub use hook::HookService;
pub use live::{LiveUsage, LiveUsageError, LiveUsageProvider};
pub use report::{ReportService, UsageReport, build_report};

/// Inputs every service reads; immutable once the app is built.
pub struct ServiceContext {
    pub config: AppConfig,
    pub pricing: PricingTable,
    pub registry: AdapterRegistry,
}

type SharedContext = Arc<ServiceContext>;

/// Service registry for app-level operations.
#[derive(Clone)]
pub struct AppServices {
    pub report: ReportService,
    pub hook: HookService,
}

impl AppServices {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self {
            report: ReportService::new(context.clone()),
            hook: HookService::new(context),
        }
    }
}
