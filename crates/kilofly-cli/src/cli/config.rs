use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kilofly_core::CoreConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Live count engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Write debug logs to this file (same as KILOFLY_LOG_FILE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Pause after every simulated step so listeners can catch up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from an explicit path, else the per-user default location, else
    /// built-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match CoreConfig::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: CliConfig =
            serde_json::from_str(json).context("Failed to deserialize config")?;
        // Re-run core validation on the nested section
        CoreConfig::from_json(&config.core.to_json()?)?;
        Ok(config)
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        if pretty {
            serde_json::to_string_pretty(self).context("Failed to serialize config")
        } else {
            serde_json::to_string(self).context("Failed to serialize config")
        }
    }
}
