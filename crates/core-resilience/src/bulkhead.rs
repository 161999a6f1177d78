//! Bulkhead: bounded concurrency per named resource
//!
//! A bulkhead hands out at most `max_concurrent` permits. Callers that find
//! no free permit wait up to `max_wait`, then get a
//! [`Rejection::BulkheadFull`]. A timed-out or cancelled wait never counts
//! toward `current_concurrent`.
//!
//! Permits are RAII guards: dropping one releases it, so a panicking or
//! cancelled caller cannot leak capacity. A permit dropped without
//! [`BulkheadPermit::release`] is counted as failed.
//!
//! # Example
//!
//! ```no_run
//! use rampart_core_resilience::bulkhead::{Bulkhead, BulkheadConfig};
//! use rampart_core_resilience::GuardError;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), GuardError<std::io::Error>> {
//! let bulkhead = Bulkhead::new("database", BulkheadConfig {
//!     max_concurrent: 20,
//!     max_wait: Duration::from_millis(250),
//! });
//!
//! let rows = bulkhead.execute(|| async {
//!     // query the database
//!     Ok::<_, std::io::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use super::error::{ConfigError, GuardError, Rejection};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

/// Configuration for a bulkhead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum operations in flight at once, at most `Semaphore::MAX_PERMITS`
    pub max_concurrent: usize,
    /// How long `acquire` waits for a free permit before rejecting
    pub max_wait: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_wait: Duration::from_secs(5),
        }
    }
}

impl BulkheadConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::MustBePositive {
                field: "max_concurrent",
            });
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ExceedsMaximum {
                field: "max_concurrent",
                max: Semaphore::MAX_PERMITS.to_string(),
            });
        }
        Ok(())
    }
}

/// Whether the bulkhead currently has free capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadState {
    /// At least one permit is free
    Accepting,
    /// Every permit is taken; new callers will wait or be rejected
    Rejecting,
}

/// Point-in-time counters of a bulkhead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadStats {
    /// Configured capacity
    pub max_concurrent: usize,
    /// Permits currently held
    pub current_concurrent: usize,
    /// `max_concurrent - current_concurrent`
    pub available_permits: usize,
    /// Permits granted since creation
    pub total_accepted: u64,
    /// Acquisitions that timed out
    pub total_rejected: u64,
    /// Permits released after a successful operation
    pub total_completed: u64,
    /// Permits released after a failed, cancelled or panicked operation
    pub total_failed: u64,
}

/// Semaphore-based concurrency limiter for one named resource
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    semaphore: Semaphore,
    current: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Bulkhead {
    /// Create a bulkhead
    ///
    /// A `max_concurrent` of zero yields a bulkhead that rejects everything;
    /// use [`Bulkhead::try_new`] to refuse such a configuration instead.
    /// Capacity above `Semaphore::MAX_PERMITS` is capped there.
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Semaphore::new(config.max_concurrent.min(Semaphore::MAX_PERMITS)),
            config,
            current: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Create a bulkhead after validating its configuration
    pub fn try_new(name: impl Into<String>, config: BulkheadConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(name, config))
    }

    /// Acquire a permit, waiting up to the configured `max_wait`
    pub async fn acquire(&self) -> Result<BulkheadPermit<'_>, Rejection> {
        self.acquire_timeout(self.config.max_wait).await
    }

    /// Acquire a permit, waiting up to `wait`
    ///
    /// Dropping the returned future while it waits abandons the wait
    /// without touching any counter.
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<BulkheadPermit<'_>, Rejection> {
        match tokio::time::timeout(wait, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(self.admit(permit)),
            Ok(Err(_)) | Err(_) => Err(self.reject(wait)),
        }
    }

    /// Acquire a permit only if one is free right now
    pub fn try_acquire(&self) -> Result<BulkheadPermit<'_>, Rejection> {
        match self.semaphore.try_acquire() {
            Ok(permit) => Ok(self.admit(permit)),
            Err(_) => Err(self.reject(Duration::ZERO)),
        }
    }

    fn admit<'a>(&'a self, permit: SemaphorePermit<'a>) -> BulkheadPermit<'a> {
        let in_flight = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(bulkhead = %self.name, in_flight, "bulkhead permit acquired");
        BulkheadPermit {
            bulkhead: self,
            _permit: permit,
            settled: false,
        }
    }

    fn reject(&self, waited: Duration) -> Rejection {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            bulkhead = %self.name,
            max_concurrent = self.config.max_concurrent,
            waited_ms = waited.as_millis() as u64,
            "bulkhead rejected call"
        );
        Rejection::BulkheadFull {
            name: self.name.clone(),
            max_wait: waited,
        }
    }

    /// Run `op` inside the bulkhead
    ///
    /// The permit is released when `op` finishes, counted as completed when
    /// `op` returns `Ok` and as failed otherwise.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().await?;
        let result = op().await;
        permit.release(result.is_ok());
        result.map_err(GuardError::Handler)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> BulkheadStats {
        let current_concurrent = self.current.load(Ordering::SeqCst);
        BulkheadStats {
            max_concurrent: self.config.max_concurrent,
            current_concurrent,
            available_permits: self.config.max_concurrent.saturating_sub(current_concurrent),
            total_accepted: self.accepted.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            total_completed: self.completed.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// `Accepting` while a permit is free
    pub fn state(&self) -> BulkheadState {
        if self.available_permits() > 0 {
            BulkheadState::Accepting
        } else {
            BulkheadState::Rejecting
        }
    }

    /// Permits not currently held
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Bulkhead name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration
    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }
}

/// A held bulkhead slot
///
/// Release it with [`BulkheadPermit::release`] to record the outcome.
/// Dropping it releases the slot and records a failure.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct BulkheadPermit<'a> {
    bulkhead: &'a Bulkhead,
    // Dropped after `Drop::drop` has decremented `current`, so the counter
    // never exceeds the semaphore's capacity.
    _permit: SemaphorePermit<'a>,
    settled: bool,
}

impl BulkheadPermit<'_> {
    /// Release the slot, recording whether the guarded operation succeeded
    pub fn release(mut self, success: bool) {
        self.settle(success);
    }

    fn settle(&mut self, success: bool) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.bulkhead.current.fetch_sub(1, Ordering::SeqCst);
        if success {
            self.bulkhead.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bulkhead.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for BulkheadPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(bulkhead = %self.bulkhead.name, "bulkhead permit dropped without an outcome");
            self.settle(false);
        }
    }
}
