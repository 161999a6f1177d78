/*!
 * Rampart - Fault-tolerance guard chain
 *
 * Host-side wiring for the guards in `rampart-core-resilience`:
 * - TOML configuration of named guards
 * - Structured logging initialisation
 * - One shared guard chain per configured name
 * - Statistics reports and a seeded load simulator
 */

pub mod config;
pub mod error;
pub mod guards;
pub mod logging;
pub mod report;
pub mod simulate;

// Re-export commonly used types
pub use config::{GuardConfig, LogFormat, LogLevel, LoggingConfig, RampartConfig};
pub use error::{RampartError, Result};
pub use guards::GuardSet;
pub use report::GuardReport;
pub use simulate::{SimulationConfig, SimulationOutcome};

pub use rampart_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
