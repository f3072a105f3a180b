pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod pricing;
pub mod services;

pub use app::AppState;
pub use config::{AppConfig, SourceConfig};
pub use error::{AppError, Result};
pub use logging::init_logging;
pub use pricing::{load_initial_pricing, load_pricing_defaults, resolve_pricing};
pub use services::{
    AppServices, HookService, LiveUsage, LiveUsageError, LiveUsageProvider, ReportService,
    ServiceContext, UsageReport, build_report,
};
