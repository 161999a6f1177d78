/*!
 * Synthetic load through a guard chain
 *
 * Drives `requests` calls at up to `concurrency` at a time against a
 * downstream stub that fails with probability `failure_rate`. The RNG is
 * seeded, so a run is reproducible apart from task interleaving.
 */

use crate::error::{RampartError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rampart_core_resilience::{Classify, GuardChain, GuardError, Handler, RejectionKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Load shape for one run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Total calls to make
    pub requests: usize,
    /// Calls in flight at once
    pub concurrency: usize,
    /// Distinct rate-limit keys, used round-robin
    pub keys: usize,
    /// Probability in `[0, 1]` that a call fails
    pub failure_rate: f64,
    /// Time each admitted call spends in the downstream
    pub latency: Duration,
    /// Seed for failure injection
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            concurrency: 8,
            keys: 4,
            failure_rate: 0.1,
            latency: Duration::from_millis(10),
            seed: 42,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(RampartError::InvalidArgument(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.keys == 0 {
            return Err(RampartError::InvalidArgument(
                "keys must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(RampartError::InvalidArgument(format!(
                "failure rate must be between 0 and 1, got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }
}

/// Counts of how each call ended
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationOutcome {
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub bulkhead_full: usize,
    pub circuit_open: usize,
    pub half_open_limit: usize,
    pub elapsed_ms: u64,
}

impl SimulationOutcome {
    /// Calls a guard turned away
    pub fn rejected(&self) -> usize {
        self.rate_limited + self.bulkhead_full + self.circuit_open + self.half_open_limit
    }

    fn record<T>(&mut self, result: &std::result::Result<T, GuardError<DownstreamError>>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(GuardError::Handler(_)) => self.failed += 1,
            Err(GuardError::Rejected(rejection)) => match rejection.kind() {
                RejectionKind::RateLimited => self.rate_limited += 1,
                RejectionKind::BulkheadFull => self.bulkhead_full += 1,
                RejectionKind::CircuitOpen => self.circuit_open += 1,
                RejectionKind::HalfOpenLimit => self.half_open_limit += 1,
            },
        }
    }
}

/// Failure injected by the downstream stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownstreamError;

impl fmt::Display for DownstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulated downstream failure")
    }
}

impl std::error::Error for DownstreamError {}

impl Classify for DownstreamError {
    fn error_kind(&self) -> Cow<'_, str> {
        Cow::Borrowed("unavailable")
    }
}

/// Downstream stub with seeded failures
struct SyntheticDownstream {
    rng: Mutex<StdRng>,
    failure_rate: f64,
    latency: Duration,
}

#[async_trait]
impl Handler<usize> for SyntheticDownstream {
    type Output = ();
    type Error = DownstreamError;

    async fn handle(&self, request: usize) -> std::result::Result<(), DownstreamError> {
        let fail = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_bool(self.failure_rate);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if fail {
            debug!(request, "Injecting downstream failure");
            Err(DownstreamError)
        } else {
            Ok(())
        }
    }
}

/// Run the load against `chain` and tally the outcomes
pub async fn run(chain: &GuardChain, config: &SimulationConfig) -> Result<SimulationOutcome> {
    config.validate()?;

    let downstream = SyntheticDownstream {
        rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
        failure_rate: config.failure_rate,
        latency: config.latency,
    };

    info!(
        guard = chain.name(),
        requests = config.requests,
        concurrency = config.concurrency,
        "Starting simulation"
    );
    let started = Instant::now();

    let keys: Vec<String> = (0..config.keys).map(|i| format!("key-{}", i)).collect();
    let downstream = &downstream;
    let keys = &keys;

    let mut outcome = stream::iter(0..config.requests)
        .map(move |i| async move {
            chain
                .execute(&keys[i % keys.len()], downstream, i)
                .await
        })
        .buffer_unordered(config.concurrency)
        .fold(SimulationOutcome::default(), |mut outcome, result| async move {
            outcome.record(&result);
            outcome
        })
        .await;

    outcome.requests = config.requests;
    outcome.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    info!(
        guard = chain.name(),
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        rejected = outcome.rejected(),
        elapsed_ms = outcome.elapsed_ms,
        "Simulation finished"
    );
    Ok(outcome)
}
