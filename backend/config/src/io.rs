//! Config file location and loading.

use crate::env::resolve_env_vars_with;
use crate::schema::FlowchatConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Default config file name within the config directory.
pub const CONFIG_FILE_NAME: &str = "flowchat.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "FLOWCHAT_CONFIG";

/// Resolve the Flowchat config directory (`~/.flowchat`).
pub fn config_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".flowchat"),
        None => PathBuf::from(".flowchat"),
    }
}

/// Resolve the config file path.
/// Priority: explicit path > `FLOWCHAT_CONFIG` env > `~/.flowchat/flowchat.yaml`
pub fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    config_dir().join(CONFIG_FILE_NAME)
}

/// Parse YAML text into the raw value tree, before env substitution.
pub fn parse_raw(yaml: &str) -> Result<Value> {
    if yaml.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let value: Value = serde_yaml::from_str(yaml).context("Failed to parse config YAML")?;
    Ok(match value {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    })
}

/// Parse YAML text, substitute `${VAR}` references from `env`, and deserialize.
pub fn parse_config(yaml: &str, env: &HashMap<String, String>) -> Result<FlowchatConfig> {
    let raw = parse_raw(yaml)?;
    let resolved = resolve_env_vars_with(&raw, env).context("Failed to resolve env vars in config")?;
    serde_json::from_value(resolved).context("Config does not match the expected schema")
}

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub async fn load_config(path: &Path, env: &HashMap<String, String>) -> Result<FlowchatConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(FlowchatConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&raw, env).with_context(|| format!("Invalid config at: {}", path.display()))?;

    info!(path = %path.display(), workflows = config.workflows.len(), "Loaded config");
    Ok(config)
}
