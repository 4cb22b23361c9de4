//! Engine configuration loader for Treadle.
//!
//! Reads `treadle.toml` from a configuration directory and deserializes it
//! into [`EngineConfig`]. A missing file yields the defaults; a file that
//! cannot be read, parsed, or validated is an error.

use std::path::Path;

use treadle_types::config::EngineConfig;
use treadle_types::error::ConfigError;

/// File name looked up inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "treadle.toml";

/// Load engine configuration from `{config_dir}/treadle.toml`.
pub async fn load_engine_config(config_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = config_dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return Ok(EngineConfig::default());
        }
        Err(err) => return Err(ConfigError::Io(err)),
    };

    let config = parse_engine_config(&content)
        .inspect_err(|err| tracing::warn!("Rejected {}: {err}", config_path.display()))?;
    tracing::debug!(path = %config_path.display(), "engine configuration loaded");
    Ok(config)
}

/// Parse and validate a TOML document.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
