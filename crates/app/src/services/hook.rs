use ingest::HookOutcome;
use tracing::debug;
use tracker_core::apply_estimated_costs;

use crate::error::Result;
use crate::services::SharedContext;

#[derive(Clone)]
pub struct HookService {
    context: SharedContext,
}

impl HookService {
    pub(super) fn new(context: SharedContext) -> Self {
        Self { context }
    }

    /// Parses one hook submission for `system`, pricing any usage it carries.
    pub fn parse(&self, system: &str, raw: &[u8]) -> Result<HookOutcome> {
        let options = self.context.config.options_for(system);
        let outcome = ingest::parse_hook(&self.context.registry, system, raw, &options)?;
        Ok(match outcome {
            HookOutcome::Events(mut events) => {
                let priced = apply_estimated_costs(&mut events, &self.context.pricing);
                debug!(system, events = events.len(), priced, "hook payload parsed");
                HookOutcome::Events(events)
            }
            HookOutcome::Unsupported => HookOutcome::Unsupported,
        })
    }
}
