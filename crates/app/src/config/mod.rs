use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use ingest::{SourceOptions, SourceSpec};
use serde::{Deserialize, Serialize};
use tracker_analytics::DEFAULT_BLOCK_HOURS;

use crate::error::{AppError, Result};

const MAX_BLOCK_HOURS: i64 = 24 * 7;

fn default_enabled() -> bool {
    true
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub system: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub options: SourceOptions,
}

impl SourceConfig {
    pub fn new(system: impl Into<String>, options: SourceOptions) -> Self {
        Self {
            system: system.into(),
            enabled: true,
            options,
        }
    }
}

/// Engine settings, usually read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub block_hours: i64,
    /// JSON pricing table replacing the built-in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            block_hours: DEFAULT_BLOCK_HOURS,
            pricing_path: None,
            log_level: "info".to_string(),
            log_json: false,
            sources: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_hours <= 0 || self.block_hours > MAX_BLOCK_HOURS {
            return Err(AppError::InvalidInput(format!(
                "block_hours must be between 1 and {MAX_BLOCK_HOURS}, got {}",
                self.block_hours
            )));
        }
        if let Some(source) = self
            .sources
            .iter()
            .find(|source| source.system.trim().is_empty())
        {
            return Err(AppError::InvalidInput(format!(
                "source entry without a system name: {source:?}"
            )));
        }
        Ok(())
    }

    pub fn block_duration(&self) -> Duration {
        Duration::hours(self.block_hours)
    }

    /// Enabled sources in configured order.
    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources
            .iter()
            .filter(|source| source.enabled)
            .map(|source| SourceSpec::new(source.system.trim(), source.options.clone()))
            .collect()
    }

    /// Options of the first entry for `system`, enabled or not.
    pub fn options_for(&self, system: &str) -> SourceOptions {
        self.sources
            .iter()
            .find(|source| source.system == system)
            .map(|source| source.options.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sources_with_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
log_level = "debug"

[[sources]]
system = "claude"
options = { projects_dir = "/tmp/projects" }

[[sources]]
system = "codex"
enabled = false
"#,
        )
        .expect("parse");
        assert_eq!(config.block_hours, 5);
        assert_eq!(config.log_level, "debug");
        let specs = config.source_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].system, "claude");
        assert_eq!(specs[0].options.get("projects_dir"), Some("/tmp/projects"));
        assert!(config.options_for("codex").get("sessions_dir").is_none());
    }

    #[test]
    fn rejects_out_of_range_block_hours() {
        let err = AppConfig::from_toml_str("block_hours = 0").expect_err("invalid");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn serialized_config_parses_back() {
        let config = AppConfig {
            sources: vec![SourceConfig::new(
                "opencode",
                SourceOptions::new().with("db_path", "/tmp/opencode.db"),
            )],
            ..AppConfig::default()
        };
        let text = config.to_toml_string().expect("serialize");
        assert_eq!(AppConfig::from_toml_str(&text).expect("parse"), config);
    }
}
