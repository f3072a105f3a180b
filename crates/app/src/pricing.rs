use std::fs;
use std::io::BufReader;
use std::path::Path;

use tracing::debug;
use tracker_core::PricingTable;

use crate::error::{AppError, Result};

pub fn load_initial_pricing() -> Result<PricingTable> {
    let data = include_str!("../initial-pricing.json");
    serde_json::from_str(data).map_err(AppError::from)
}

pub fn load_pricing_defaults(path: &Path) -> Result<PricingTable> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(AppError::from)
}

/// The table at `path` when given, otherwise the built-in one.
pub fn resolve_pricing(path: Option<&Path>) -> Result<PricingTable> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading pricing table");
            load_pricing_defaults(path)
        }
        None => load_initial_pricing(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_core::{TokenCounters, compute_cost_breakdown};

    #[test]
    fn built_in_table_prices_opus_scenario() {
        let table = load_initial_pricing().expect("pricing");
        let rate = table.resolve("claude-opus-4-6").expect("rate");
        let cost = compute_cost_breakdown(
            TokenCounters {
                input_tokens: 1_000_000,
                output_tokens: 100_000,
                cache_read_tokens: 500_000,
                cache_write_tokens: 200_000,
                ..TokenCounters::default()
            },
            rate,
        );
        assert!((cost.total_cost_usd - 27.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_haiku_uses_category_rate() {
        let table = load_initial_pricing().expect("pricing");
        let rate = table.resolve("claude-3-5-haiku-20241022").expect("rate");
        assert_eq!(rate.input_per_million, 0.8);
        assert_eq!(rate.output_per_million, 4.0);
    }

    #[test]
    fn table_file_overrides_built_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pricing.json");
        let table = load_initial_pricing().expect("pricing");
        let file = fs::File::create(&path).expect("create");
        serde_json::to_writer_pretty(file, &table).expect("write");
        assert_eq!(resolve_pricing(Some(&path)).expect("load"), table);
    }
}
