use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    ARRIVAL_FLAG_MS, DEFAULT_ACTIVE_PACKAGE_STATUSES, RESUBSCRIBE_INITIAL_DELAY_MS,
    RESUBSCRIBE_MAX_DELAY_MS, SUBSCRIBE_TIMEOUT_MS, TRUST_POINT_GAIN_THRESHOLD,
};
use crate::error::CoreError;

/// Tunables for the live count engine. Every field has a default, so a
/// partial JSON file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// How long the "new package" flag stays raised
    pub arrival_flag_ms: u64,
    /// Restart the arrival timer when another increase lands while it runs.
    /// When false a running timer is left alone and clears the flag early.
    pub restart_arrival_timer: bool,
    pub active_package_statuses: Vec<String>,
    pub trust_point_gain_threshold: u32,
    pub subscribe_timeout_ms: u64,
    pub resubscribe: BackoffConfig,
}

/// Exponential backoff for resubscribing after a lost or failed subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` retries forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            arrival_flag_ms: ARRIVAL_FLAG_MS,
            restart_arrival_timer: true,
            active_package_statuses: DEFAULT_ACTIVE_PACKAGE_STATUSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            trust_point_gain_threshold: TRUST_POINT_GAIN_THRESHOLD,
            subscribe_timeout_ms: SUBSCRIBE_TIMEOUT_MS,
            resubscribe: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: RESUBSCRIBE_INITIAL_DELAY_MS,
            max_delay_ms: RESUBSCRIBE_MAX_DELAY_MS,
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    /// Delay before the given retry attempt (1-based), doubling up to the cap
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

impl CoreConfig {
    pub fn arrival_flag_duration(&self) -> Duration {
        Duration::from_millis(self.arrival_flag_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Default location: `<config dir>/kilofly/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kilofly").join("config.json"))
    }

    /// Load config from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: CoreConfig = serde_json::from_str(json).map_err(|e| CoreError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(self).map_err(|e| CoreError::Config {
            message: format!("Failed to serialize config: {}", e),
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.active_package_statuses.is_empty() {
            return Err(CoreError::Config {
                message: "activePackageStatuses must not be empty".to_string(),
            });
        }
        if self.resubscribe.initial_delay_ms > self.resubscribe.max_delay_ms {
            return Err(CoreError::Config {
                message: "resubscribe.initialDelayMs exceeds maxDelayMs".to_string(),
            });
        }
        Ok(())
    }
}
