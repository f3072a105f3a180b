use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracker_app::AppConfig;

use crate::dirs::{HomeDirs, default_sources};

const CONFIG_DIR_NAME: &str = "agent-usage";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: AppConfig,
    pub file: PathBuf,
    pub created: bool,
}

/// Reads `explicit` or the default config file, writing a fresh default
/// first when the default file does not exist yet.
pub fn load_or_create(explicit: Option<&Path>, dirs: Option<&HomeDirs>) -> Result<ConfigLoad, String> {
    if let Some(file) = explicit {
        let config = AppConfig::load(file)
            .map_err(|err| format!("load config {}: {}", file.display(), err))?;
        return Ok(ConfigLoad {
            config,
            file: file.to_path_buf(),
            created: false,
        });
    }
    let file = config_dir(dirs)?.join(CONFIG_FILE_NAME);
    load_or_create_at(&file, dirs)
}

fn load_or_create_at(file: &Path, dirs: Option<&HomeDirs>) -> Result<ConfigLoad, String> {
    if file.exists() {
        let config = AppConfig::load(file)
            .map_err(|err| format!("load config {}: {}", file.display(), err))?;
        return Ok(ConfigLoad {
            config,
            file: file.to_path_buf(),
            created: false,
        });
    }

    let config = AppConfig {
        sources: dirs.map(default_sources).unwrap_or_default(),
        ..AppConfig::default()
    };
    let contents = config
        .to_toml_string()
        .map_err(|err| format!("serialize config: {}", err))?;
    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir)
            .map_err(|err| format!("create config dir {}: {}", dir.display(), err))?;
    }
    fs::write(file, contents).map_err(|err| format!("write config {}: {}", file.display(), err))?;

    Ok(ConfigLoad {
        config,
        file: file.to_path_buf(),
        created: true,
    })
}

fn config_dir(dirs: Option<&HomeDirs>) -> Result<PathBuf, String> {
    if let Some(base) = env::var_os("XDG_CONFIG_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(base).join(CONFIG_DIR_NAME));
    }
    let dirs = dirs.ok_or_else(|| "resolve config dir: HOME is not set".to_string())?;
    Ok(dirs.home.join(".config").join(CONFIG_DIR_NAME))
}
