use crate::classifier::DEFAULT_INSTRUMENTATION_PREFIXES;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_COLLECTION_NAME: &str = "dataLayer";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid engine config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("poll duration of {0}ms exceeds the {max}ms limit", max = MAX_POLL_DURATION_MS)]
    PollDurationTooLong(u64),
}

/// Upper bound on the late-creation poll: one hour.
pub const MAX_POLL_DURATION_MS: u64 = 60 * 60 * 1_000;

/// Engine settings. Only `collection_name` comes from the bootstrap side; the
/// rest have defaults suited to a page load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub collection_name: String,
    pub poll_interval_ms: u64,
    pub poll_duration_ms: u64,
    pub instrumentation_prefixes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collection_name: DEFAULT_COLLECTION_NAME.to_string(),
            poll_interval_ms: 50,
            poll_duration_ms: 5_000,
            instrumentation_prefixes: DEFAULT_INSTRUMENTATION_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Config for the one string the bootstrap hands over. Absent or blank
    /// names fall back to `dataLayer`.
    pub fn for_collection(name: Option<&str>) -> Self {
        Self {
            collection_name: resolve_collection_name(name),
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut config: EngineConfig = toml::from_str(source)?;
        config.collection_name = resolve_collection_name(Some(&config.collection_name));
        config.validate()?;
        Ok(config)
    }

    /// Check the poll timing. Fields are public, so the engine re-checks
    /// before starting the poll.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.poll_duration_ms > MAX_POLL_DURATION_MS {
            return Err(ConfigError::PollDurationTooLong(self.poll_duration_ms));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_duration(&self) -> Duration {
        Duration::from_millis(self.poll_duration_ms)
    }
}

pub fn resolve_collection_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_COLLECTION_NAME.to_string(),
    }
}
