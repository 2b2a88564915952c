//! Process configuration, read once at startup from `~/.jobscout/config.json`.
//!
//! A missing config file is not an error — the worker comes up with every
//! helper unconfigured and default cache policy, which is enough to drain
//! archive/merge-style tasks and to run against a seeded database in tests.

use std::path::PathBuf;

use serde::Deserialize;

use crate::cache::CacheSettings;
use crate::isolation::HelperCommand;

/// Helper process command lines, one per external concern.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelperCommands {
    pub facts: Option<HelperCommand>,
    pub levels: Option<HelperCommand>,
    pub compensation: Option<HelperCommand>,
    pub contacts: Option<HelperCommand>,
    pub reply: Option<HelperCommand>,
    pub mailbox: Option<HelperCommand>,
    pub mail: Option<HelperCommand>,
    pub sheet: Option<HelperCommand>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Override for the database location. Default: `~/.jobscout/jobscout.db`.
    pub db_path: Option<PathBuf>,
    /// Worker poll interval between queue checks.
    pub poll_interval_secs: u64,
    /// Backoff after an unexpected loop-level error.
    pub error_backoff_secs: u64,
    pub cache: CacheSettings,
    pub helpers: HelperCommands,
    /// Floor for the default comp-based fit heuristic.
    pub fit_min_total_comp: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            poll_interval_secs: 1,
            error_backoff_secs: 5,
            cache: CacheSettings::default(),
            helpers: HelperCommands::default(),
            fit_min_total_comp: 200_000.0,
        }
    }
}

/// Load config from `~/.jobscout/config.json`. Missing file yields defaults;
/// an unreadable or malformed file is an error worth stopping for.
pub fn load_config() -> Result<Config, String> {
    let home = dirs::home_dir().ok_or("Home directory not found")?;
    let path = home.join(".jobscout").join("config.json");

    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}
