use std::collections::HashMap;

use tracker_core::TokenCounters;

/// Difference between two cumulative snapshots. A field that went backwards
/// means the counter was reset, so the raw snapshot is the delta.
pub fn delta_counters(prev: Option<&TokenCounters>, current: TokenCounters) -> TokenCounters {
    match prev {
        Some(prev) => current.checked_sub(*prev).unwrap_or(current),
        None => current,
    }
}

/// Last-seen cumulative snapshot per logical stream (session or file).
#[derive(Debug, Default)]
pub struct CounterDeltas {
    previous: HashMap<String, TokenCounters>,
}

impl CounterDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `snapshot` for `stream` and returns the per-turn delta, or
    /// `None` when the delta carries no tokens.
    pub fn observe(&mut self, stream: &str, snapshot: TokenCounters) -> Option<TokenCounters> {
        let delta = delta_counters(self.previous.get(stream), snapshot);
        self.previous.insert(stream.to_string(), snapshot);
        if delta.is_zero() { None } else { Some(delta) }
    }
}
