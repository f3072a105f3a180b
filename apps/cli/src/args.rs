use std::env;
use std::path::PathBuf;

use chrono::DateTime;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Command {
    /// Collect every configured source and print a usage report.
    #[default]
    Report,
    /// Parse one hook payload from stdin for the named system.
    Hook { system: String },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub since: Option<String>,
    pub pretty: bool,
}

pub fn parse_args() -> Result<CliArgs, String> {
    parse_from(env::args().skip(1))
}

pub fn parse_from<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut parsed = CliArgs::default();
    let mut command_seen = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --config".to_string())?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--since" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --since".to_string())?;
                DateTime::parse_from_rfc3339(&value)
                    .map_err(|_| format!("invalid --since timestamp: {value}"))?;
                parsed.since = Some(value);
            }
            "--pretty" => {
                parsed.pretty = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "report" if !command_seen => {
                command_seen = true;
            }
            "hook" if !command_seen => {
                let system = args
                    .next()
                    .ok_or_else(|| "missing system for hook".to_string())?;
                parsed.command = Command::Hook { system };
                command_seen = true;
            }
            _ => {
                return Err(format!("unknown argument: {arg}"));
            }
        }
    }

    Ok(parsed)
}

pub fn print_help() {
    println!(
        "Agent Usage CLI\n\n\
Usage:\n  agent-usage [report] [--config <path>] [--since <rfc3339>] [--pretty]\n  agent-usage hook <system> [--config <path>] [--pretty] < payload.json\n\n\
Options:\n  --config <path>   Read configuration from this file instead of the default location\n  --since <time>    Ignore events older than this RFC-3339 timestamp\n  --pretty          Indent the JSON output\n  -h, --help        Show this help message\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        parse_from(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn report_is_the_default_command() {
        let parsed = parse(&["--pretty"]).expect("parse");
        assert_eq!(parsed.command, Command::Report);
        assert!(parsed.pretty);
    }

    #[test]
    fn hook_takes_a_system_name() {
        let parsed = parse(&["hook", "claude", "--config", "/tmp/c.toml"]).expect("parse");
        assert_eq!(
            parsed.command,
            Command::Hook {
                system: "claude".to_string()
            }
        );
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(parse(&["hook"]).is_err());
    }

    #[test]
    fn since_must_be_rfc3339() {
        let parsed = parse(&["report", "--since", "2025-01-01T00:00:00Z"]).expect("parse");
        assert_eq!(parsed.since.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert!(parse(&["--since", "yesterday"]).is_err());
        assert!(parse(&["report", "report"]).is_err());
    }
}
