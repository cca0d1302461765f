pub mod model;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub use model::{BotConfig, LoggingConfig};

/// `<config_dir>/teamer/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("teamer")
        .join("config.toml")
}

/// Load the configuration from `path`, or from the default location when
/// `path` is `None`. A missing default file yields the built-in defaults; a
/// missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<BotConfig> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path(), false),
    };
    if !explicit && !path.exists() {
        return Ok(BotConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: BotConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    Ok(config)
}
