/*!
 * Error types for the Rampart host crate
 */

use rampart_core_resilience::ConfigError;
use std::io;
use thiserror::Error;

/// Result alias for the host crate
pub type Result<T> = std::result::Result<T, RampartError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

#[derive(Debug, Error)]
pub enum RampartError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Config file is not valid TOML or does not match the schema
    #[error("Failed to parse config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Config could not be rendered as TOML
    #[error("Failed to serialize config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A guard's settings are out of range
    #[error("Invalid config for guard '{guard}': {source}")]
    Config {
        guard: String,
        #[source]
        source: ConfigError,
    },

    /// Logging could not be initialised
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// No guard with this name is configured
    #[error("Unknown guard '{0}'")]
    UnknownGuard(String),

    /// A command-line value is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Report could not be encoded
    #[error("Failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

impl RampartError {
    /// Create a config error for one guard
    pub fn config<S: Into<String>>(guard: S, source: ConfigError) -> Self {
        RampartError::Config {
            guard: guard.into(),
            source,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RampartError::TomlParse(_)
            | RampartError::Config { .. }
            | RampartError::UnknownGuard(_)
            | RampartError::InvalidArgument(_) => EXIT_CONFIG,
            RampartError::Io(_)
            | RampartError::TomlSerialize(_)
            | RampartError::Logging(_)
            | RampartError::Json(_) => EXIT_FAILURE,
        }
    }

    /// Check if this error comes from user-supplied configuration
    pub fn is_config_error(&self) -> bool {
        self.exit_code() == EXIT_CONFIG
    }
}
