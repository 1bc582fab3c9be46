// Configuration loader
// Resolves the data directory and reads <data_dir>/config.toml if present

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::constants::{CONFIG_FILE, DATA_DIR_ENV, DEFAULT_DATA_DIR_NAME};
use super::settings::Config;

/// `$FRYLER_HOME`, or `~/.fryler`
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(DEFAULT_DATA_DIR_NAME))
}

/// Load configuration from the default data directory
pub fn load_config() -> Result<Config> {
    load_config_from(&resolve_data_dir()?)
}

/// Load `<data_dir>/config.toml`, falling back to defaults when it is missing
pub fn load_config_from(data_dir: &Path) -> Result<Config> {
    let config_path = data_dir.join(CONFIG_FILE);

    let mut config = if config_path.exists() {
        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        tracing::debug!("Loaded config from {}", config_path.display());
        config
    } else {
        tracing::debug!("No config at {}, using defaults", config_path.display());
        Config::default()
    };

    config.data_dir = data_dir.to_path_buf();
    config.validate()?;
    Ok(config)
}
