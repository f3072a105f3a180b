mod args;
mod config;
mod dirs;

use std::io::{self, Read};

use chrono::Utc;
use ingest::{CancellationToken, HookOutcome, IngestError, OPT_SINCE};
use serde_json::json;
use tracing::{info, warn};
use tracker_app::{AppError, AppState, UsageReport, init_logging};

use crate::args::Command;
use crate::dirs::{HomeDirs, resolve_sources};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = args::parse_args().map_err(|err| {
        eprintln!("{err}");
        args::print_help();
        io::Error::new(io::ErrorKind::InvalidInput, "invalid arguments")
    })?;

    let home = HomeDirs::from_env();
    let load =
        config::load_or_create(args.config.as_deref(), home.as_ref()).map_err(io::Error::other)?;
    init_logging(&load.config.log_level, load.config.log_json);
    if load.created {
        info!(path = %load.file.display(), "created default config");
    }

    let mut app_config = load.config;
    resolve_sources(&mut app_config.sources, home.as_ref());
    if let Some(since) = &args.since {
        for source in &mut app_config.sources {
            source.options.insert(OPT_SINCE, since.as_str());
        }
    }
    let app = AppState::new(app_config)?;

    let output = match args.command {
        Command::Report => {
            let report = run_report(&app).await?;
            info!(
                status = report.status.as_str(),
                partial = report.partial,
                events = report.stats.events_kept,
                "report ready"
            );
            to_json(&report, args.pretty)?
        }
        Command::Hook { system } => run_hook(&app, &system, args.pretty)?,
    };
    println!("{output}");
    Ok(())
}

async fn run_report(app: &AppState) -> Result<UsageReport, Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping collection");
            watcher.cancel();
        }
    });

    let services = app.services.clone();
    let report = tokio::task::spawn_blocking(move || {
        let now = Utc::now();
        match services.report.collect(&cancel) {
            Ok(output) => Ok(services.report.build(output, None, now, false)),
            Err(AppError::Ingest(err @ IngestError::Cancelled(_))) => {
                let partial = err.into_partial().unwrap_or_default();
                Ok(services.report.build(partial, None, now, true))
            }
            Err(err) => Err(err),
        }
    })
    .await;
    interrupt.abort();
    Ok(report??)
}

fn run_hook(app: &AppState, system: &str, pretty: bool) -> Result<String, Box<dyn std::error::Error>> {
    let mut raw = Vec::new();
    io::stdin().read_to_end(&mut raw)?;
    match app.services.hook.parse(system, &raw)? {
        HookOutcome::Events(events) => to_json(&events, pretty),
        HookOutcome::Unsupported => {
            warn!(system, "source has no hook channel");
            to_json(&json!({ "system": system, "unsupported": true }), pretty)
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String, Box<dyn std::error::Error>> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}
