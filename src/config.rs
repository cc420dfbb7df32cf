//! Configuration for the window engine.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// What to do with an already-buffered window when the incoming segment is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleWindowPolicy {
    /// Run the readiness loop on the unchanged window anyway
    #[default]
    Rerun,
    /// Skip the readiness loop and only persist
    Skip,
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Window length for feature extraction, in seconds
    pub window_size_secs: u32,

    /// Slide step, in seconds. Must not exceed the window length.
    pub overlap_size_secs: u32,

    /// SQLite file holding per-user windows
    pub store_path: PathBuf,

    /// Directory holding per-user model files
    pub models_dir: PathBuf,

    /// JSON-lines file receiving one audit record per processed segment
    pub audit_path: PathBuf,

    /// Path for storing pipeline statistics
    pub data_path: PathBuf,

    /// Readiness behavior after a rejected segment
    pub stale_window_policy: StaleWindowPolicy,

    /// Reject segments older than, or repeating, the last merged one
    pub reject_out_of_order: bool,

    /// Maximum number of loaded models kept in memory (unbounded if unset)
    pub model_cache_capacity: Option<NonZeroUsize>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-window-engine");

        Self {
            window_size_secs: 2,
            overlap_size_secs: 1,
            store_path: data_dir.join("windows.db"),
            models_dir: data_dir.join("models"),
            audit_path: data_dir.join("audit.jsonl"),
            data_path: data_dir,
            stale_window_policy: StaleWindowPolicy::default(),
            reject_out_of_order: true,
            model_cache_capacity: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location, apply environment
    /// overrides, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-window-engine")
            .join("config.json")
    }

    /// Apply `WINDOW_SIZE`, `OVERLAP_SIZE` and `STORE_PATH` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WINDOW_SIZE") {
            self.window_size_secs = parse_secs("WINDOW_SIZE", &v)?;
        }
        if let Some(v) = lookup("OVERLAP_SIZE") {
            self.overlap_size_secs = parse_secs("OVERLAP_SIZE", &v)?;
        }
        if let Some(v) = lookup("STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Reject window/overlap combinations the readiness loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::core::windowing::validate_sizes(self.window_size_secs, self.overlap_size_secs)?;
        if self.overlap_size_secs == 0 {
            tracing::warn!(
                "overlap_size_secs is 0: windows will never slide and buffers will grow without bound"
            );
        }
        Ok(())
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.models_dir)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        for file in [&self.store_path, &self.audit_path] {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::IoError(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn parse_secs(name: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::ParseError(format!("{name}={value}: {e}")))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_size_secs, 2);
        assert_eq!(config.overlap_size_secs, 1);
        assert_eq!(config.stale_window_policy, StaleWindowPolicy::Rerun);
        assert!(config.reject_out_of_order);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [("WINDOW_SIZE", "10"), ("OVERLAP_SIZE", " 5 ")].into();
        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.window_size_secs, 10);
        assert_eq!(config.overlap_size_secs, 5);

        let bad: HashMap<&str, &str> = [("WINDOW_SIZE", "two")].into();
        assert!(matches!(
            config.apply_overrides(|k| bad.get(k).map(|v| v.to_string())),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_zero_model_cache_capacity_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"model_cache_capacity": 0}"#).is_err());

        let config: Config = serde_json::from_str(r#"{"model_cache_capacity": 3}"#).unwrap();
        assert_eq!(config.model_cache_capacity, NonZeroUsize::new(3));
    }

    #[test]
    fn test_overlap_exceeding_window_rejected() {
        let config = Config {
            window_size_secs: 2,
            overlap_size_secs: 3,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"window_size_secs": 4, "stale_window_policy": "skip"}"#)
                .unwrap();
        assert_eq!(config.window_size_secs, 4);
        assert_eq!(config.overlap_size_secs, 1);
        assert_eq!(config.stale_window_policy, StaleWindowPolicy::Skip);
    }
}
