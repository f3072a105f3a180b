use std::sync::Arc;

use ingest::AdapterRegistry;
use tracker_core::PricingTable;

use crate::config::AppConfig;
use crate::error::Result;
use crate::pricing;
use crate::services::{AppServices, ServiceContext};

/// Application state shared by frontends.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ServiceContext>,
    pub services: AppServices,
}

impl AppState {
    /// Validates `config` and loads its pricing table.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let pricing = pricing::resolve_pricing(config.pricing_path.as_deref())?;
        Ok(Self::with_parts(config, pricing, AdapterRegistry::with_defaults()))
    }

    pub fn with_parts(config: AppConfig, pricing: PricingTable, registry: AdapterRegistry) -> Self {
        let context = Arc::new(ServiceContext {
            config,
            pricing,
            registry,
        });
        let services = AppServices::new(context.clone());
        Self { context, services }
    }

    pub fn config(&self) -> &AppConfig {
        &self.context.config
    }
}
