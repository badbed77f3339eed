use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::Result;
use dirs::config_dir;
use picvault_storage::firestore::FirestoreConfig;
use picvault_sync::SyncSettings;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/picvault/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Signed-in user id; `--user` and `PICVAULT_USER_ID` take precedence.
    pub user_id: Option<String>,
    /// Override for the local document directory.
    pub data_dir: Option<PathBuf>,
    pub store_timeout_secs: Option<u64>,
    pub validation_timeout_secs: Option<u64>,
    /// Remote Firestore backend; the local file store is used when absent.
    pub firestore: Option<FirestoreConfig>,
}

impl Config {
    pub fn sync_settings(&self) -> SyncSettings {
        let defaults = SyncSettings::default();
        SyncSettings {
            store_timeout: self
                .store_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.store_timeout),
            validation_timeout: self
                .validation_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.validation_timeout),
            ..defaults
        }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("picvault").join("config.toml"))
}

/// Write the config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

/// Identity resolution: explicit flag, then environment, then config file.
pub fn resolve_user(flag: Option<String>, env: Option<String>, config: &Config) -> Option<String> {
    flag.or(env)
        .or_else(|| config.user_id.clone())
        .filter(|id| !id.trim().is_empty())
}
