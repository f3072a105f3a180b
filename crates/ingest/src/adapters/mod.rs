use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::types::{Collection, HookOutcome, Result, SourceOptions};

mod claude;
mod codex;
mod jsonl;
mod opencode;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use opencode::OpenCodeAdapter;

/// One data source kind turned into canonical events.
pub trait SourceAdapter: Send + Sync {
    /// Registry key, e.g. `"claude"`.
    fn system(&self) -> &'static str;

    /// Reads whatever the configured locations hold. Unreadable locations
    /// yield an empty collection; malformed records are skipped. On
    /// cancellation the partial collection comes back with `cancelled` set.
    fn collect(&self, options: &SourceOptions, cancel: &CancellationToken) -> Collection;

    /// Parses one synchronous hook submission.
    fn parse_hook_payload(&self, raw: &[u8], options: &SourceOptions) -> Result<HookOutcome> {
        let _ = (raw, options);
        Ok(HookOutcome::Unsupported)
    }
}

/// Flat set of adapters keyed by system name.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<&'static str, Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ClaudeAdapter);
        registry.register(CodexAdapter);
        registry.register(OpenCodeAdapter);
        registry
    }

    /// Adds `adapter`, replacing any adapter with the same system name.
    pub fn register<A: SourceAdapter + 'static>(&mut self, adapter: A) {
        self.adapters.insert(adapter.system(), Box::new(adapter));
    }

    pub fn get(&self, system: &str) -> Option<&dyn SourceAdapter> {
        self.adapters.get(system).map(|adapter| adapter.as_ref())
    }

    pub fn systems(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("systems", &self.systems())
            .finish()
    }
}
