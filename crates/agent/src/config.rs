use std::path::Path;

use anyhow::{Context, Result};
use rsa_protocol::AgentConfig;

/// Load configuration from a TOML file at the given path. If the file
/// doesn't exist, returns the documented defaults.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(AgentConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: AgentConfig =
        toml::from_str(&contents).with_context(|| "failed to parse config TOML")?;

    tracing::info!(path = %path.display(), "loaded config");
    Ok(config)
}
