use std::env;
use std::path::{Path, PathBuf};

use ingest::{OPT_DB_PATH, OPT_PROJECTS_DIR, OPT_SESSIONS_DIR, SourceOptions};
use tracker_app::SourceConfig;

const PATH_OPTIONS: [&str; 3] = [OPT_PROJECTS_DIR, OPT_SESSIONS_DIR, OPT_DB_PATH];
const KNOWN_SYSTEMS: [&str; 3] = ["claude", "codex", "opencode"];

/// Base directories the default source locations hang off.
#[derive(Debug, Clone)]
pub struct HomeDirs {
    pub home: PathBuf,
    pub codex_home: Option<PathBuf>,
    pub data_home: Option<PathBuf>,
}

impl HomeDirs {
    pub fn from_env() -> Option<Self> {
        let home = non_empty_var("HOME")?;
        Some(Self {
            home,
            codex_home: non_empty_var("CODEX_HOME"),
            data_home: non_empty_var("XDG_DATA_HOME"),
        })
    }

    /// Where `system` keeps its data when the config does not say.
    pub fn default_location(&self, system: &str) -> Option<(&'static str, PathBuf)> {
        match system {
            "claude" => Some((OPT_PROJECTS_DIR, self.home.join(".claude").join("projects"))),
            "codex" => {
                let base = self
                    .codex_home
                    .clone()
                    .unwrap_or_else(|| self.home.join(".codex"));
                Some((OPT_SESSIONS_DIR, base.join("sessions")))
            }
            "opencode" => {
                let base = self
                    .data_home
                    .clone()
                    .unwrap_or_else(|| self.home.join(".local").join("share"));
                Some((OPT_DB_PATH, base.join("opencode").join("opencode.db")))
            }
            _ => None,
        }
    }
}

fn non_empty_var(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn expand_tilde(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }
    match raw.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

/// Source entries for a fresh config file. Systems whose data is not on
/// disk are written disabled.
pub fn default_sources(dirs: &HomeDirs) -> Vec<SourceConfig> {
    KNOWN_SYSTEMS
        .iter()
        .filter_map(|system| {
            let (key, path) = dirs.default_location(system)?;
            let mut source = SourceConfig::new(
                *system,
                SourceOptions::new().with(key, path.to_string_lossy()),
            );
            source.enabled = path.exists();
            Some(source)
        })
        .collect()
}

/// Expands `~` in path options and fills in the default location for
/// sources that name none.
pub fn resolve_sources(sources: &mut [SourceConfig], dirs: Option<&HomeDirs>) {
    let Some(dirs) = dirs else {
        return;
    };
    for source in sources {
        for key in PATH_OPTIONS {
            if let Some(raw) = source.options.get(key).map(str::to_string) {
                let expanded = expand_tilde(&raw, &dirs.home);
                source.options.insert(key, expanded.to_string_lossy());
            }
        }
        if let Some((key, path)) = dirs.default_location(source.system.trim())
            && source.options.get(key).is_none()
        {
            source.options.insert(key, path.to_string_lossy());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn dirs_at(home: &Path) -> HomeDirs {
        HomeDirs {
            home: home.to_path_buf(),
            codex_home: None,
            data_home: None,
        }
    }

    #[test]
    fn tilde_expands_against_home() {
        let home = Path::new("/home/dev");
        assert_eq!(expand_tilde("~", home), PathBuf::from("/home/dev"));
        assert_eq!(
            expand_tilde("~/.claude/projects", home),
            PathBuf::from("/home/dev/.claude/projects")
        );
        assert_eq!(expand_tilde("/var/~x", home), PathBuf::from("/var/~x"));
    }

    #[test]
    fn codex_home_overrides_the_default() {
        let mut dirs = dirs_at(Path::new("/home/dev"));
        dirs.codex_home = Some(PathBuf::from("/opt/codex"));
        let (key, path) = dirs.default_location("codex").expect("codex");
        assert_eq!(key, OPT_SESSIONS_DIR);
        assert_eq!(path, PathBuf::from("/opt/codex/sessions"));
        assert!(dirs.default_location("unknown").is_none());
    }

    #[test]
    fn defaults_are_enabled_only_when_present() {
        let home = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(home.path().join(".claude/projects")).expect("mkdir");
        let sources = default_sources(&dirs_at(home.path()));
        assert_eq!(sources.len(), 3);
        assert!(sources[0].enabled);
        assert_eq!(sources[0].system, "claude");
        assert!(!sources[1].enabled);
        assert!(!sources[2].enabled);
    }

    #[test]
    fn resolve_fills_missing_locations() {
        let dirs = dirs_at(Path::new("/home/dev"));
        let mut sources = vec![
            SourceConfig::new("claude", SourceOptions::new().with(OPT_PROJECTS_DIR, "~/logs")),
            SourceConfig::new("opencode", SourceOptions::new()),
        ];
        resolve_sources(&mut sources, Some(&dirs));
        assert_eq!(sources[0].options.get(OPT_PROJECTS_DIR), Some("/home/dev/logs"));
        assert_eq!(
            sources[1].options.get(OPT_DB_PATH),
            Some("/home/dev/.local/share/opencode/opencode.db")
        );
    }
}
