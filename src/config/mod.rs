//! Configuration module for the engine.
//!
//! This module handles the numeric knobs of the tick executor and its
//! watchdog, plus the graph load policy:
//! - Tick cadence
//! - Strict or lenient graph loading
//! - Burst ceiling and oscillation detection window
//!
//! Configuration is stored as TOML. Every field has a default, so an empty
//! file (or no file at all) yields the stock behavior.
//!
//! # Example
//!
//! ```ignore
//! use stagegraph::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default("stagegraph.toml");
//! assert_eq!(config.tick_interval_ms, 33);
//! config.save("stagegraph.toml")?;
//! ```

use crate::error::{Result, StageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default tick interval in milliseconds (~30 Hz).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 33;

/// Default ceiling on sink values delivered in one tick.
pub const DEFAULT_BURST_CEILING: usize = 200;

/// Default number of history entries kept per sink port.
pub const DEFAULT_OSCILLATION_WINDOW: usize = 24;

/// Default minimum alternation length that trips the oscillation check.
pub const DEFAULT_MIN_ALTERNATIONS: usize = 6;

/// Default time span an alternation must fit in, in milliseconds.
pub const DEFAULT_OSCILLATION_SPAN_MS: f64 = 1000.0;

/// Actions that legitimately change every tick and never count as oscillation.
pub const DEFAULT_CONTINUOUS_ACTIONS: &[&str] = &[
    "modulateColor",
    "modulateVolume",
    "setColor",
    "setVolume",
    "setBrightness",
];

// ==================== Load Policy ====================

/// How graph loading treats invalid content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPolicy {
    /// Any unknown node type or invalid connection fails the load.
    #[default]
    Strict,
    /// Unknown nodes are skipped and invalid connections dropped.
    Lenient,
}

// ==================== Watchdog Config ====================

/// Thresholds for the burst and oscillation protections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Maximum sink values (lists counted by length) delivered per tick.
    pub burst_ceiling: usize,

    /// History entries kept per (node, port).
    pub oscillation_window: usize,

    /// Shortest strict A/B alternation that halts the executor.
    pub oscillation_min_alternations: usize,

    /// Alternations older than this many milliseconds are forgotten.
    pub oscillation_span_ms: f64,

    /// Action names excluded from oscillation signatures.
    pub continuous_actions: Vec<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            burst_ceiling: DEFAULT_BURST_CEILING,
            oscillation_window: DEFAULT_OSCILLATION_WINDOW,
            oscillation_min_alternations: DEFAULT_MIN_ALTERNATIONS,
            oscillation_span_ms: DEFAULT_OSCILLATION_SPAN_MS,
            continuous_actions: DEFAULT_CONTINUOUS_ACTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

// ==================== Engine Config ====================

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between ticks in milliseconds.
    pub tick_interval_ms: u64,

    /// Policy applied when loading a `GraphState`.
    pub load_policy: LoadPolicy,

    /// Actuator protection thresholds.
    pub watchdog: WatchdogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            load_policy: LoadPolicy::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject settings the executor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(StageError::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        let wd = &self.watchdog;
        if wd.burst_ceiling == 0 {
            return Err(StageError::Config(
                "watchdog.burst_ceiling must be greater than zero".to_string(),
            ));
        }
        if wd.oscillation_min_alternations < 2 {
            return Err(StageError::Config(
                "watchdog.oscillation_min_alternations must be at least 2".to_string(),
            ));
        }
        if wd.oscillation_window < wd.oscillation_min_alternations {
            return Err(StageError::Config(format!(
                "watchdog.oscillation_window ({}) is smaller than oscillation_min_alternations ({})",
                wd.oscillation_window, wd.oscillation_min_alternations
            )));
        }
        if wd.oscillation_span_ms <= 0.0 {
            return Err(StageError::Config(
                "watchdog.oscillation_span_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StageError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            StageError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StageError::Config(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| StageError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            StageError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval_ms, 33);
        assert_eq!(config.load_policy, LoadPolicy::Strict);
        assert_eq!(config.watchdog.burst_ceiling, 200);
        assert_eq!(config.watchdog.oscillation_min_alternations, 6);
        assert_eq!(config.watchdog.oscillation_span_ms, 1000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            load_policy = "lenient"

            [watchdog]
            burst_ceiling = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.load_policy, LoadPolicy::Lenient);
        assert_eq!(config.watchdog.burst_ceiling, 50);
        assert_eq!(config.watchdog.oscillation_window, DEFAULT_OSCILLATION_WINDOW);
        assert_eq!(config.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = EngineConfig::default();
        config.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.watchdog.oscillation_min_alternations = 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.watchdog.oscillation_window = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");

        let mut config = EngineConfig::default();
        config.tick_interval_ms = 20;
        config.watchdog.continuous_actions.push("pulseHue".to_string());
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(dir.path().join("missing.toml"));
        assert_eq!(config, EngineConfig::default());
    }
}
