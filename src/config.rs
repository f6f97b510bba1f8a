//! Supervisor configuration.
//!
//! Defaults are overridable from `<gai_home>/config.toml` and, for the
//! intervals, from the CLI flags. The config value is threaded through the
//! supervisor constructor; there are no module-level singletons.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Full-cycle interval between background-check sweeps.
pub const DEFAULT_INTERVAL_SECONDS: u64 = 300;

/// Fast-cycle interval between hook/workflow completion polls.
pub const DEFAULT_HOOK_INTERVAL_SECONDS: u64 = 10;

/// Age after which a RUNNING hook or timestamp-valued suffix is a zombie.
pub const DEFAULT_ZOMBIE_TIMEOUT_SECONDS: u64 = 7200;

/// Debounce window for per-ChangeSpec background checks.
pub const DEFAULT_CHECK_DEBOUNCE_SECONDS: u64 = 300;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the on-disk state tree (default `~/.gai`).
    pub gai_home: PathBuf,
    /// Root under which numbered workspace directories live.
    pub workspace_root: PathBuf,
    pub interval_seconds: u64,
    pub hook_interval_seconds: u64,
    pub zombie_timeout_seconds: u64,
    pub check_debounce_seconds: u64,
}

/// On-disk shape of `config.toml`; every field optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    workspace_root: Option<PathBuf>,
    interval_seconds: Option<u64>,
    hook_interval_seconds: Option<u64>,
    zombie_timeout_seconds: Option<u64>,
    check_debounce_seconds: Option<u64>,
}

impl Config {
    /// Build a config rooted at the given gai home, overlaying
    /// `<gai_home>/config.toml` when present.
    pub fn load(gai_home: Option<PathBuf>) -> anyhow::Result<Self> {
        let gai_home = match gai_home {
            Some(home) => home,
            None => default_gai_home()?,
        };

        let file = read_file_config(&gai_home.join("config.toml"))?;

        Ok(Config {
            workspace_root: file
                .workspace_root
                .unwrap_or_else(|| gai_home.join("workspaces")),
            interval_seconds: file.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS),
            hook_interval_seconds: file
                .hook_interval_seconds
                .unwrap_or(DEFAULT_HOOK_INTERVAL_SECONDS),
            zombie_timeout_seconds: file
                .zombie_timeout_seconds
                .unwrap_or(DEFAULT_ZOMBIE_TIMEOUT_SECONDS),
            check_debounce_seconds: file
                .check_debounce_seconds
                .unwrap_or(DEFAULT_CHECK_DEBOUNCE_SECONDS),
            gai_home,
        })
    }

    /// Directory holding project files (`<gai_home>/projects`).
    pub fn projects_dir(&self) -> PathBuf {
        self.gai_home.join("projects")
    }

    /// Directory for hook output files, created on demand.
    pub fn hooks_dir(&self) -> PathBuf {
        self.gai_home.join("hooks")
    }

    /// Directory for workflow output files, created on demand.
    pub fn workflows_dir(&self) -> PathBuf {
        self.gai_home.join("workflows")
    }

    /// Directory for background-check output files, created on demand.
    pub fn checks_dir(&self) -> PathBuf {
        self.gai_home.join("checks")
    }

    /// Directory for comment JSON artefacts, created on demand.
    pub fn comments_dir(&self) -> PathBuf {
        self.gai_home.join("comments")
    }

    /// Path of the saved-queries JSON file.
    pub fn saved_queries_path(&self) -> PathBuf {
        self.gai_home.join("saved_queries.json")
    }

    /// Fixture config rooted at a temp directory.
    #[cfg(test)]
    pub fn for_test(gai_home: &Path) -> Self {
        Config {
            gai_home: gai_home.to_path_buf(),
            workspace_root: gai_home.join("workspaces"),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            hook_interval_seconds: DEFAULT_HOOK_INTERVAL_SECONDS,
            zombie_timeout_seconds: DEFAULT_ZOMBIE_TIMEOUT_SECONDS,
            check_debounce_seconds: DEFAULT_CHECK_DEBOUNCE_SECONDS,
        }
    }
}

fn default_gai_home() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot resolve home directory"))?;
    Ok(home.join(".gai"))
}

fn read_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let parsed: FileConfig = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
            Ok(parsed)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(anyhow::anyhow!("cannot read {}: {e}", path.display())),
    }
}
