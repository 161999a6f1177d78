/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{RampartError, Result};

/// Crates whose events the default filter lets through
const LOG_TARGETS: [&str; 2] = ["rampart", "rampart_core_resilience"];

/// Level actually used: `--verbose` raises anything quieter to DEBUG
pub fn effective_level(config: &LoggingConfig, verbose: bool) -> Level {
    let configured = config.level.to_tracing_level();
    if verbose && configured < Level::DEBUG {
        Level::DEBUG
    } else {
        configured
    }
}

/// Filter directive for our crates at `level`
pub fn default_directive(level: Level) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize structured logging based on configuration
///
/// `RUST_LOG`, when set, replaces the configured filter.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let log_level = effective_level(config, verbose);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(log_level)))
        .map_err(|e| RampartError::Logging(format!("Failed to create log filter: {}", e)))?;

    if let Some(ref log_path) = config.file {
        init_file_logging(log_path, env_filter)
    } else {
        init_stderr_logging(env_filter, config.format)
    }
}

/// Initialize logging to stderr, keeping stdout for command output
fn init_stderr_logging(env_filter: EnvFilter, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };

    result.map_err(|e| RampartError::Logging(e.to_string()))
}

/// Initialize logging to a file, always as JSON lines
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path).map_err(|e| {
        RampartError::Logging(format!(
            "Failed to create log file {}: {}",
            log_path.display(),
            e
        ))
    })?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false) // No ANSI colors in file
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| RampartError::Logging(e.to_string()))
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(Level::DEBUG)));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}
