use tracing_subscriber::{EnvFilter, fmt};

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber writing to stderr. `RUST_LOG` overrides
/// `level`. Safe to call more than once; later calls are ignored.
pub fn init_logging(level: &str, json: bool) {
    let filter = build_filter(level);
    let result = if json {
        fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .try_init()
    } else {
        fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
    };
    drop(result);
}
