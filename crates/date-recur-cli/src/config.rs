use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use date_recur::EngineConfig;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "DATE_RECUR_CONFIG";

/// Load the engine configuration.
///
/// Uses `path`, then `$DATE_RECUR_CONFIG`, then the built-in defaults.
#[tracing::instrument]
pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os(CONFIG_ENV) {
            Some(env_path) if !env_path.is_empty() => PathBuf::from(env_path),
            _ => {
                tracing::debug!("no config file given, using defaults");
                return Ok(EngineConfig::default());
            }
        },
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Surface grid and cache errors at startup rather than on first use.
    config
        .part_grid()
        .with_context(|| format!("Invalid part grid in {}", path.display()))?;
    config
        .cache_config()
        .with_context(|| format!("Invalid cache settings in {}", path.display()))?;

    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}
