use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::db::RetryPolicy;
use crate::error::{TrackerError, TrackerResult};
use crate::prompts::{PromptOverrides, PromptSet};

pub const ENV_DB_PATH: &str = "WORKLENS_DB_PATH";
pub const ENV_TICK_INTERVAL_SECS: &str = "WORKLENS_TICK_INTERVAL_SECS";
pub const ENV_SESSION_TIMEOUT_SECS: &str = "WORKLENS_SESSION_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub pool_size: u32,
    pub busy_timeout_ms: u32,
    /// Attempts per operation when SQLite reports busy/locked.
    pub max_write_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub pool_wait_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 100,
            max_write_attempts: 5,
            retry_base_delay_ms: 20,
            pool_wait_timeout_secs: 60,
        }
    }
}

impl StorageConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_write_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: defaults
                .max_delay
                .max(Duration::from_millis(self.retry_base_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub database_path: PathBuf,
    pub tick_interval_secs: u64,
    /// Consecutive capture failures tolerated before the session is ended.
    pub max_consecutive_capture_failures: u32,
    /// Sessions are ended automatically after this long. `None` disables it.
    pub session_timeout_secs: Option<u64>,
    /// Upper bound for one provider call inside a tick.
    pub analysis_timeout_secs: u64,
    pub storage: StorageConfig,
    pub prompts: PromptOverrides,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("worklens.sqlite3"),
            tick_interval_secs: 15,
            max_consecutive_capture_failures: 5,
            session_timeout_secs: None,
            analysis_timeout_secs: 120,
            storage: StorageConfig::default(),
            prompts: PromptOverrides::default(),
        }
    }
}

/// Loop and lifetime parameters handed to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub tick_interval: Duration,
    pub max_consecutive_capture_failures: u32,
    pub session_timeout: Option<Duration>,
    pub analysis_timeout: Option<Duration>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerConfig::default().tracker_settings()
    }
}

impl TrackerConfig {
    /// Reads `path` if it exists, otherwise starts from defaults. Environment
    /// overrides are applied on top, then the result is validated.
    pub fn load(path: &Path) -> TrackerResult<Self> {
        let mut config = Self::read_file(path)
            .map_err(|err| TrackerError::configuration(format!("{err:#}")))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Applies `WORKLENS_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> TrackerResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|value| !value.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_TICK_INTERVAL_SECS) {
            self.tick_interval_secs = parse_secs(ENV_TICK_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SESSION_TIMEOUT_SECS) {
            self.session_timeout_secs = match parse_secs(ENV_SESSION_TIMEOUT_SECS, &raw)? {
                0 => None,
                secs => Some(secs),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.tick_interval_secs == 0 {
            return Err(TrackerError::configuration(
                "tick_interval_secs must be greater than zero",
            ));
        }
        if self.storage.pool_size == 0 {
            return Err(TrackerError::configuration(
                "storage.pool_size must be greater than zero",
            ));
        }
        if self.storage.max_write_attempts == 0 {
            return Err(TrackerError::configuration(
                "storage.max_write_attempts must be greater than zero",
            ));
        }
        if self.max_consecutive_capture_failures == 0 {
            return Err(TrackerError::configuration(
                "max_consecutive_capture_failures must be greater than zero",
            ));
        }
        if self.session_timeout_secs == Some(0) {
            return Err(TrackerError::configuration(
                "session_timeout_secs must be greater than zero when set",
            ));
        }
        Ok(())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            max_consecutive_capture_failures: self.max_consecutive_capture_failures,
            session_timeout: self.session_timeout_secs.map(Duration::from_secs),
            analysis_timeout: (self.analysis_timeout_secs > 0)
                .then(|| Duration::from_secs(self.analysis_timeout_secs)),
        }
    }

    pub fn prompt_set(&self) -> PromptSet {
        PromptSet::with_overrides(&self.prompts)
    }
}

fn parse_secs(key: &str, raw: &str) -> TrackerResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| TrackerError::configuration(format!("{key} must be a whole number of seconds, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_capture_cadence() {
        let settings = TrackerConfig::default().tracker_settings();
        assert_eq!(settings.tick_interval, Duration::from_secs(15));
        assert_eq!(settings.max_consecutive_capture_failures, 5);
        assert!(settings.session_timeout.is_none());
        assert_eq!(settings.analysis_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn missing_file_loads_defaults_and_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worklens.json");
        assert_eq!(TrackerConfig::read_file(&path).unwrap(), TrackerConfig::default());

        fs::write(&path, r#"{"tick_interval_secs": 5, "storage": {"pool_size": 2}}"#).unwrap();
        let config = TrackerConfig::read_file(&path).unwrap();
        assert_eq!(config.tick_interval_secs, 5);
        assert_eq!(config.storage.pool_size, 2);
        assert_eq!(config.storage.busy_timeout_ms, 100);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/worklens.json");
        let config = TrackerConfig {
            session_timeout_secs: Some(3600),
            ..TrackerConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(TrackerConfig::read_file(&path).unwrap(), config);
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DB_PATH, "/tmp/other.sqlite3"),
            (ENV_TICK_INTERVAL_SECS, "3"),
            (ENV_SESSION_TIMEOUT_SECS, "0"),
        ]);
        let mut config = TrackerConfig {
            session_timeout_secs: Some(60),
            ..TrackerConfig::default()
        };
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.sqlite3"));
        assert_eq!(config.tick_interval_secs, 3);
        assert!(config.session_timeout_secs.is_none());
    }

    #[test]
    fn bad_override_is_a_configuration_error() {
        let mut config = TrackerConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_TICK_INTERVAL_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Configuration(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = TrackerConfig {
            tick_interval_secs: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            TrackerError::Configuration(_)
        ));
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worklens.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            TrackerConfig::load(&path).unwrap_err(),
            TrackerError::Configuration(_)
        ));
    }
}
