/*!
 * Rampart CLI - Command Line Interface
 *
 * `rampart check` validates a guard config; `rampart simulate` drives
 * synthetic load through one configured guard and reports what happened.
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use rampart::{
    config::RampartConfig,
    error::{RampartError, EXIT_FAILURE, EXIT_SUCCESS},
    logging,
    report::{self, GuardReport},
    resilience::GuardRegistry,
    simulate::{self, SimulationConfig, SimulationOutcome},
    GuardSet,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rampart")]
#[command(version, about = "Rate limiter, bulkhead and circuit breaker in front of any handler", long_about = None)]
struct Cli {
    /// Enable debug logging (overrides the configured level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a config file, then list its guards
    Check {
        /// Path to the TOML config
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Drive synthetic load through one guard
    Simulate {
        /// Path to the TOML config
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// Guard to exercise
        #[arg(short, long)]
        guard: String,

        /// Total calls to make
        #[arg(long, default_value = "100")]
        requests: usize,

        /// Calls in flight at once
        #[arg(long, default_value = "8")]
        concurrency: usize,

        /// Distinct rate-limit keys, used round-robin
        #[arg(long, default_value = "4")]
        keys: usize,

        /// Probability in [0, 1] that a call fails
        #[arg(long, default_value = "0.1")]
        failure_rate: f64,

        /// Downstream latency per call in milliseconds
        #[arg(long, default_value = "10")]
        latency_ms: u64,

        /// RNG seed for failure injection
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Print the result as JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Print an example config file
    ExampleConfig,
}

#[derive(Serialize)]
struct SimulationReport {
    outcome: SimulationOutcome,
    guards: GuardReport,
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<RampartError>()
                .map_or(EXIT_FAILURE, RampartError::exit_code)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let config = load_config(&config, cli.verbose)?;
            let chains = config
                .guards
                .iter()
                .map(|(name, guard)| {
                    guard
                        .to_chain_config()
                        .map(|chain| (name.as_str(), chain))
                        .map_err(|e| RampartError::config(name, e))
                })
                .collect::<Result<Vec<_>, _>>()?;

            println!("{}", report::config_table(chains.iter().map(|(n, c)| (*n, c))));
            println!("{} guard(s) OK", chains.len());
        }

        Commands::Simulate {
            config,
            guard,
            requests,
            concurrency,
            keys,
            failure_rate,
            latency_ms,
            seed,
            json,
        } => {
            let config = load_config(&config, cli.verbose)?;
            let registry = GuardRegistry::new();
            let set = GuardSet::from_config(&config, &registry)?;
            let chain = set.chain(&guard)?;

            let sim = SimulationConfig {
                requests,
                concurrency,
                keys,
                failure_rate,
                latency: Duration::from_millis(latency_ms),
                seed,
            };
            sim.validate()?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            let outcome = runtime.block_on(simulate::run(chain, &sim))?;
            let guards = GuardReport::collect(&set);

            if json {
                let report = SimulationReport { outcome, guards };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).map_err(RampartError::from)?
                );
            } else {
                println!("{}", outcome_table(&outcome));
                println!("{}", guards.to_table());
            }
        }

        Commands::ExampleConfig => {
            print!("{}", RampartConfig::example().to_toml_string()?);
        }
    }

    Ok(())
}

/// Load, validate and start logging from a config file
fn load_config(path: &Path, verbose: bool) -> anyhow::Result<RampartConfig> {
    let config = RampartConfig::from_file(path)
        .with_context(|| format!("Failed to load config file {}", path.display()))?;
    logging::init_logging(&config.logging, verbose)?;
    config.validate()?;
    Ok(config)
}

fn outcome_table(outcome: &SimulationOutcome) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
    table.set_header(vec!["Outcome", "Calls"]);

    for (label, count) in [
        ("succeeded", outcome.succeeded),
        ("failed (handler)", outcome.failed),
        ("rate limited", outcome.rate_limited),
        ("bulkhead full", outcome.bulkhead_full),
        ("circuit open", outcome.circuit_open),
        ("half-open limit", outcome.half_open_limit),
    ] {
        table.add_row(vec![label.to_string(), count.to_string()]);
    }
    table.add_row(vec![
        "total".to_string(),
        format!("{} in {} ms", outcome.requests, outcome.elapsed_ms),
    ]);
    table
}
