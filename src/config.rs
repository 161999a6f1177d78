/*!
 * Configuration types for Rampart
 *
 * A config file names a set of guards. Each guard may carry any subset of
 * the three stages; omitted fields take the library defaults.
 *
 * ```toml
 * [logging]
 * level = "info"
 *
 * [guards.orders]
 * rate_limit = "100/minute"
 *
 * [guards.orders.bulkhead]
 * max_concurrent = 10
 * max_wait_secs = 5.0
 *
 * [guards.orders.circuit_breaker]
 * failure_threshold = 5
 * recovery_timeout_secs = 60.0
 * monitored_errors = ["timeout", "unavailable"]
 * ```
 */

use crate::error::{RampartError, Result};
use rampart_core_resilience::{
    BulkheadConfig, ChainConfig, CircuitBreakerConfig, ConfigError, MonitoredErrors,
    RateLimitConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RampartConfig {
    /// Diagnostic output settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named guards, keyed by the protected resource
    #[serde(default)]
    pub guards: BTreeMap<String, GuardConfig>,
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub level: LogLevel,

    /// Line format
    #[serde(default)]
    pub format: LogFormat,

    /// Log file path (None = stderr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

/// Stages configured for one named guard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Per-key quota, as `"N/unit"` or an explicit table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSetting>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerSettings>,
}

/// Rate limit as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateLimitSetting {
    /// `"100/minute"`
    Shorthand(String),
    /// `{ requests_per_window = 100, window_size_secs = 60 }`
    Explicit {
        requests_per_window: u32,
        #[serde(default = "default_window_size_secs")]
        window_size_secs: u64,
    },
}

impl RateLimitSetting {
    /// Resolve to a validated quota
    pub fn to_config(&self) -> std::result::Result<RateLimitConfig, ConfigError> {
        match self {
            RateLimitSetting::Shorthand(rate) => rate.parse(),
            RateLimitSetting::Explicit {
                requests_per_window,
                window_size_secs,
            } => RateLimitConfig::new(
                *requests_per_window,
                Duration::from_secs(*window_size_secs),
            ),
        }
    }
}

/// Bulkhead settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkheadSettings {
    /// Maximum operations in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Seconds to wait for a permit before rejecting
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: f64,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl BulkheadSettings {
    /// Resolve to a validated bulkhead config
    pub fn to_config(&self) -> std::result::Result<BulkheadConfig, ConfigError> {
        let config = BulkheadConfig {
            max_concurrent: self.max_concurrent,
            max_wait: secs_to_duration("max_wait_secs", self.max_wait_secs)?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive monitored failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds spent open before a probe is allowed
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: f64,

    /// Concurrent probes allowed while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Error kinds that count as failures (None = all)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitored_errors: Option<Vec<String>>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
            monitored_errors: None,
        }
    }
}

impl CircuitBreakerSettings {
    /// Resolve to a validated breaker config
    pub fn to_config(&self) -> std::result::Result<CircuitBreakerConfig, ConfigError> {
        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: secs_to_duration(
                "recovery_timeout_secs",
                self.recovery_timeout_secs,
            )?,
            half_open_max_calls: self.half_open_max_calls,
            monitored_errors: match &self.monitored_errors {
                None => MonitoredErrors::All,
                Some(kinds) => MonitoredErrors::only(kinds.iter().cloned()),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

impl GuardConfig {
    /// Resolve every configured stage
    pub fn to_chain_config(&self) -> std::result::Result<ChainConfig, ConfigError> {
        Ok(ChainConfig {
            rate_limit: self.rate_limit.as_ref().map(RateLimitSetting::to_config).transpose()?,
            bulkhead: self.bulkhead.as_ref().map(BulkheadSettings::to_config).transpose()?,
            circuit_breaker: self
                .circuit_breaker
                .as_ref()
                .map(CircuitBreakerSettings::to_config)
                .transpose()?,
        })
    }

    /// True when no stage is configured
    pub fn is_empty(&self) -> bool {
        self.rate_limit.is_none() && self.bulkhead.is_none() && self.circuit_breaker.is_none()
    }
}

impl RampartConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: RampartConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Render configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Check every guard's settings
    pub fn validate(&self) -> Result<()> {
        for (name, guard) in &self.guards {
            if guard.is_empty() {
                warn!(guard = %name, "Guard has no stages configured; calls pass straight through");
            }
            guard
                .to_chain_config()
                .map_err(|e| RampartError::config(name, e))?;
        }
        Ok(())
    }

    /// Settings of one named guard
    pub fn guard(&self, name: &str) -> Result<&GuardConfig> {
        self.guards
            .get(name)
            .ok_or_else(|| RampartError::UnknownGuard(name.to_string()))
    }

    /// A starting point for a new config file
    pub fn example() -> Self {
        let mut guards = BTreeMap::new();
        guards.insert(
            "orders".to_string(),
            GuardConfig {
                rate_limit: Some(RateLimitSetting::Shorthand("100/minute".to_string())),
                bulkhead: Some(BulkheadSettings::default()),
                circuit_breaker: Some(CircuitBreakerSettings {
                    monitored_errors: Some(vec!["timeout".to_string(), "unavailable".to_string()]),
                    ..Default::default()
                }),
            },
        );
        guards.insert(
            "search".to_string(),
            GuardConfig {
                rate_limit: Some(RateLimitSetting::Explicit {
                    requests_per_window: 20,
                    window_size_secs: 1,
                }),
                ..Default::default()
            },
        );

        Self {
            logging: LoggingConfig::default(),
            guards,
        }
    }
}

fn secs_to_duration(field: &'static str, secs: f64) -> std::result::Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidDuration {
        field,
        value: secs.to_string(),
    })
}

fn default_window_size_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    BulkheadConfig::default().max_concurrent
}

fn default_max_wait_secs() -> f64 {
    BulkheadConfig::default().max_wait.as_secs_f64()
}

fn default_failure_threshold() -> u32 {
    CircuitBreakerConfig::default().failure_threshold
}

fn default_recovery_timeout_secs() -> f64 {
    CircuitBreakerConfig::default().recovery_timeout.as_secs_f64()
}

fn default_half_open_max_calls() -> u32 {
    CircuitBreakerConfig::default().half_open_max_calls
}
