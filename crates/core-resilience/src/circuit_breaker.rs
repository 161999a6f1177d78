//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! protected operation keeps failing. It has three states:
//! - Closed: normal operation, every call is attempted
//! - Open: the operation is unhealthy, calls fail immediately until
//!   `last_failure_time + recovery_timeout`
//! - HalfOpen: up to `half_open_max_calls` probe calls test recovery
//!
//! ```text
//! Closed ──[failure_count >= failure_threshold]──> Open
//!   ▲                                               │
//!   │                                               │ [recovery_timeout elapsed,
//!   │                                               │  checked on next call]
//!   │                                               ▼
//!   └────────────[probe succeeds]─────────────── HalfOpen
//!                                                   │
//!                      Open <──[probe fails]────────┘
//! ```
//!
//! Only failures whose [`Classify::error_kind`] is in the configured
//! [`MonitoredErrors`] are counted. Everything else is handed back to the
//! caller without touching breaker state.

use super::clock::{system_clock, Clock};
use super::error::{Classify, ConfigError, GuardError, Rejection};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, a limited number of probes test recovery
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name for logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Which handler error kinds count as breaker failures
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MonitoredErrors {
    /// Every handler error counts
    #[default]
    All,
    /// Only errors whose kind is in the set count
    Only(HashSet<String>),
}

impl MonitoredErrors {
    /// Monitor only the given kinds
    pub fn only<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MonitoredErrors::Only(kinds.into_iter().map(Into::into).collect())
    }

    /// Whether errors of `kind` feed breaker accounting
    pub fn contains(&self, kind: &str) -> bool {
        match self {
            MonitoredErrors::All => true,
            MonitoredErrors::Only(kinds) => kinds.contains(kind),
        }
    }
}

/// Longest accepted `recovery_timeout`
pub const MAX_RECOVERY_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive monitored failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent Open before a probe is allowed, at most
    /// [`MAX_RECOVERY_TIMEOUT`]
    pub recovery_timeout: Duration,
    /// Probe calls allowed at once while HalfOpen
    pub half_open_max_calls: u32,
    /// Error kinds that count as failures
    pub monitored_errors: MonitoredErrors,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
            monitored_errors: MonitoredErrors::All,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::MustBePositive {
                field: "failure_threshold",
            });
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::MustBePositive {
                field: "half_open_max_calls",
            });
        }
        if self.recovery_timeout > MAX_RECOVERY_TIMEOUT {
            return Err(ConfigError::ExceedsMaximum {
                field: "recovery_timeout",
                max: format!("{:?}", MAX_RECOVERY_TIMEOUT),
            });
        }
        Ok(())
    }
}

/// Snapshot of a breaker's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Effective state (an Open breaker whose recovery time has passed
    /// reports `HalfOpen`)
    pub state: CircuitState,
    /// Consecutive monitored failures while Closed
    pub failure_count: u32,
    /// Successes since the breaker last changed state
    pub success_count: u32,
    /// When the last monitored failure happened
    pub last_failure_time: Option<Instant>,
    /// Probe calls currently running
    pub half_open_calls_in_flight: u32,
    /// When an Open breaker will let a probe through
    pub recovery_time: Option<Instant>,
    /// Time left until `recovery_time`, measured on the breaker's clock
    pub retry_after: Option<Duration>,
    /// Calls rejected as open or over the probe limit
    pub total_rejected: u64,
    /// Successful calls since creation
    pub total_successes: u64,
    /// Monitored failures since creation
    pub total_failures: u64,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    half_open_in_flight: u32,
    /// Bumped on every transition; outcomes from an older epoch are stale
    epoch: u64,
    total_rejected: u64,
    total_successes: u64,
    total_failures: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            half_open_in_flight: 0,
            epoch: 0,
            total_rejected: 0,
            total_successes: 0,
            total_failures: 0,
        }
    }

    /// Time left before an Open breaker may probe; zero once due
    fn recovery_remaining(&self, recovery_timeout: Duration, now: Instant) -> Duration {
        let open_for = self
            .last_failure_time
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        recovery_timeout.saturating_sub(open_for)
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.success_count = 0;
        self.half_open_in_flight = 0;
        self.epoch += 1;
    }
}

/// `now + wait`, saturating at `now + MAX_RECOVERY_TIMEOUT` for unvalidated configs
fn instant_after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait)
        .or_else(|| now.checked_add(MAX_RECOVERY_TIMEOUT))
        .unwrap_or(now)
}

/// Circuit breaker guarding one named operation
///
/// # Example
/// ```no_run
/// use rampart_core_resilience::{CircuitBreaker, CircuitBreakerConfig, GuardError};
///
/// # async fn example() -> Result<(), GuardError<std::io::Error>> {
/// let breaker = CircuitBreaker::new("inventory-api", CircuitBreakerConfig::default());
///
/// let stock = breaker.call(|| async {
///     // call the downstream service
///     Ok::<_, std::io::Error>(12)
/// }).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker on the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    /// Create a breaker on a caller-supplied clock
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Rejects without running `op` when the circuit is open or the probe
    /// limit is reached. Never retries.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let permit = self.try_acquire()?;

        match op().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.record_failure(&e);
                Err(GuardError::Handler(e))
            }
        }
    }

    /// Ask to run one call
    ///
    /// Moves an Open breaker to HalfOpen once its recovery time has come.
    /// The returned permit must be given the call's outcome; dropping it
    /// releases any probe slot without changing state.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, Rejection> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let retry_after = inner.recovery_remaining(self.config.recovery_timeout, now);
            if !retry_after.is_zero() {
                inner.total_rejected += 1;
                debug!(breaker = %self.name, "circuit open, rejecting call");
                return Err(Rejection::CircuitOpen {
                    name: self.name.clone(),
                    recovery_time: instant_after(now, retry_after),
                    retry_after,
                });
            }
            info!(breaker = %self.name, "Circuit breaker transitioning: Open → HalfOpen");
            inner.transition(CircuitState::HalfOpen);
        }

        let probe = inner.state == CircuitState::HalfOpen;
        if probe {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.total_rejected += 1;
                debug!(breaker = %self.name, "half-open probe limit reached");
                return Err(Rejection::HalfOpenLimit {
                    name: self.name.clone(),
                });
            }
            inner.half_open_in_flight += 1;
        }

        Ok(BreakerPermit {
            breaker: self,
            epoch: inner.epoch,
            probe,
            settled: false,
        })
    }

    /// Release a probe slot held by a permit of the current epoch
    fn release_probe(&self, inner: &mut BreakerInner, epoch: u64, probe: bool) {
        if probe && inner.epoch == epoch {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Handle successful operation
    fn on_success(&self, epoch: u64, probe: bool) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        self.release_probe(&mut inner, epoch, probe);

        if inner.epoch != epoch {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count += 1;
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Circuit breaker transitioning: HalfOpen → Closed (recovered)");
                inner.failure_count = 0;
                inner.transition(CircuitState::Closed);
            }
            CircuitState::Open => {}
        }
    }

    /// Handle a monitored failure
    fn on_failure(&self, epoch: u64, probe: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.total_failures += 1;
        self.release_probe(&mut inner, epoch, probe);

        if inner.epoch != epoch {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker transitioning: Closed → Open"
                    );
                    inner.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Circuit breaker transitioning: HalfOpen → Open (recovery failed)");
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                inner.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Handle an outcome that must not affect state
    fn on_ignored(&self, epoch: u64, probe: bool) {
        let mut inner = self.lock();
        self.release_probe(&mut inner, epoch, probe);
    }

    /// Current state, as the next call would see it
    pub fn state(&self) -> CircuitState {
        self.stats().state
    }

    /// Snapshot of the breaker's counters
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = self.clock.now();
        let inner = self.lock();

        let (state, retry_after) = match inner.state {
            CircuitState::Open => {
                let retry_after = inner.recovery_remaining(self.config.recovery_timeout, now);
                if retry_after.is_zero() {
                    (CircuitState::HalfOpen, None)
                } else {
                    (CircuitState::Open, Some(retry_after))
                }
            }
            state => (state, None),
        };

        CircuitBreakerStats {
            state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            half_open_calls_in_flight: inner.half_open_in_flight,
            recovery_time: retry_after.map(|d| instant_after(now, d)),
            retry_after,
            total_rejected: inner.total_rejected,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.lock();
        info!(breaker = %self.name, "Circuit breaker reset to Closed");
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.transition(CircuitState::Closed);
    }

    /// Open the circuit now, as if the failure threshold had been reached
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        warn!(breaker = %self.name, "Circuit breaker forced Open");
        inner.last_failure_time = Some(now);
        inner.transition(CircuitState::Open);
    }

    /// Breaker name (the protected operation id)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

/// Admission to run one call through a [`CircuitBreaker`]
#[derive(Debug)]
#[must_use = "a permit should be given the call's outcome"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// The call succeeded
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.epoch, self.probe);
    }

    /// The call failed with `error`; returns whether the failure was counted
    pub fn record_failure<E: Classify + ?Sized>(mut self, error: &E) -> bool {
        self.settled = true;
        let kind = error.error_kind();
        if self.breaker.config.monitored_errors.contains(&kind) {
            self.breaker.on_failure(self.epoch, self.probe);
            true
        } else {
            debug!(breaker = %self.breaker.name, kind = %kind, "unmonitored error ignored by circuit breaker");
            self.breaker.on_ignored(self.epoch, self.probe);
            false
        }
    }

    /// The call ended in a way that says nothing about downstream health
    pub fn record_ignored(mut self) {
        self.settled = true;
        self.breaker.on_ignored(self.epoch, self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_ignored(self.epoch, self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::borrow::Cow;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Timeout,
        Validation,
    }

    impl Classify for TestError {
        fn error_kind(&self) -> Cow<'_, str> {
            match self {
                TestError::Timeout => "timeout".into(),
                TestError::Validation => "validation".into(),
            }
        }
    }

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::with_clock("test", config, Arc::new(clock.clone()));
        (breaker, clock)
    }

    fn config(failure_threshold: u32, recovery_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(recovery_secs),
            ..Default::default()
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), GuardError<TestError>> {
        breaker.call(|| async { Err(TestError::Timeout) }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), GuardError<TestError>> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.half_open_max_calls, 1);
        assert_eq!(config.monitored_errors, MonitoredErrors::All);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(config(0, 1).validate().is_err());
        let config = CircuitBreakerConfig {
            half_open_max_calls: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let (breaker, _clock) = breaker(CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_ok!(succeed(&breaker).await);
        assert_eq!(breaker.stats().success_count, 1);
    }

    #[tokio::test]
    async fn test_opens_exactly_at_threshold() {
        for k in 1..=5 {
            let (breaker, _clock) = breaker(config(k, 30));

            for _ in 0..k - 1 {
                assert!(fail(&breaker).await.is_err());
            }
            assert_eq!(breaker.state(), CircuitState::Closed, "k={}", k);
            assert_eq!(breaker.stats().failure_count, k - 1);

            assert!(fail(&breaker).await.is_err());
            assert_eq!(breaker.state(), CircuitState::Open, "k={}", k);
        }
    }

    #[tokio::test]
    async fn test_open_rejects_without_running_op() {
        let (breaker, _clock) = breaker(config(1, 30));
        fail(&breaker).await.ok();

        let mut ran = false;
        let result: Result<(), GuardError<TestError>> = breaker
            .call(|| {
                ran = true;
                async { Ok(()) }
            })
            .await;

        assert!(!ran);
        assert!(matches!(
            result,
            Err(GuardError::Rejected(Rejection::CircuitOpen { .. }))
        ));
        assert_eq!(breaker.stats().total_rejected, 1);
    }

    #[tokio::test]
    async fn test_recovery_boundary() {
        let (breaker, clock) = breaker(config(1, 60));
        fail(&breaker).await.ok();
        let opened_at = breaker.stats().last_failure_time.unwrap();

        clock.advance(Duration::from_secs(60) - Duration::from_millis(1));
        match breaker.try_acquire() {
            Err(Rejection::CircuitOpen {
                recovery_time,
                retry_after,
                ..
            }) => {
                assert_eq!(recovery_time, opened_at + Duration::from_secs(60));
                assert_eq!(retry_after, Duration::from_millis(1));
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }

        clock.advance(Duration::from_millis(1));
        let permit = breaker.try_acquire().unwrap();
        assert!(permit.is_probe());
        assert_eq!(breaker.stats().half_open_calls_in_flight, 1);
        permit.record_success();
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let (breaker, clock) = breaker(config(2, 10));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        clock.advance(Duration::from_secs(10));

        assert!(succeed(&breaker).await.is_ok());

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.half_open_calls_in_flight, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let (breaker, clock) = breaker(config(1, 10));
        fail(&breaker).await.ok();
        let first_failure = breaker.stats().last_failure_time.unwrap();

        clock.advance(Duration::from_secs(15));
        assert!(matches!(fail(&breaker).await, Err(GuardError::Handler(_))));

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        let reopened_at = stats.last_failure_time.unwrap();
        assert_eq!(reopened_at - first_failure, Duration::from_secs(15));
        assert_eq!(stats.recovery_time, Some(reopened_at + Duration::from_secs(10)));
        assert_eq!(stats.retry_after, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_recovery_timeout_above_maximum_is_invalid() {
        let config = CircuitBreakerConfig {
            recovery_timeout: MAX_RECOVERY_TIMEOUT + Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExceedsMaximum {
                field: "recovery_timeout",
                ..
            })
        ));
        assert!(config_with_timeout(MAX_RECOVERY_TIMEOUT).validate().is_ok());
    }

    fn config_with_timeout(recovery_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_huge_recovery_timeout_stays_open() {
        let (breaker, clock) = breaker(config_with_timeout(Duration::MAX));
        fail(&breaker).await.ok();
        clock.advance(Duration::from_secs(3600));

        let rejected = assert_err!(breaker.try_acquire());
        assert!(matches!(rejected, Rejection::CircuitOpen { .. }));

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(
            stats.retry_after,
            Some(Duration::MAX - Duration::from_secs(3600))
        );
        assert!(stats.recovery_time.is_some());
    }

    #[tokio::test]
    async fn test_half_open_probe_limit() {
        let (breaker, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(5),
            half_open_max_calls: 2,
            ..Default::default()
        });
        fail(&breaker).await.ok();
        clock.advance(Duration::from_secs(5));

        let first = breaker.try_acquire().unwrap();
        let second = breaker.try_acquire().unwrap();
        assert!(matches!(
            breaker.try_acquire(),
            Err(Rejection::HalfOpenLimit { .. })
        ));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // A dropped probe frees its slot
        drop(second);
        let third = breaker.try_acquire().unwrap();

        first.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // Outcome of a probe from the closed half-open period is stale
        third.record_failure(&TestError::Timeout);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn test_unmonitored_errors_do_not_trip() {
        let (breaker, _clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            monitored_errors: MonitoredErrors::only(["timeout"]),
            ..Default::default()
        });

        for _ in 0..10 {
            let result: Result<(), _> = breaker
                .call(|| async { Err(TestError::Validation) })
                .await;
            assert_eq!(
                result.unwrap_err().into_handler_error(),
                Some(TestError::Validation)
            );
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);

        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unmonitored_probe_failure_keeps_half_open() {
        let (breaker, clock) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(1),
            monitored_errors: MonitoredErrors::only(["timeout"]),
            ..Default::default()
        });
        fail(&breaker).await.ok();
        clock.advance(Duration::from_secs(1));

        let permit = breaker.try_acquire().unwrap();
        assert!(!permit.record_failure(&TestError::Validation));

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.half_open_calls_in_flight, 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (breaker, _clock) = breaker(config(3, 30));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.stats().failure_count, 2);

        succeed(&breaker).await.ok();
        assert_eq!(breaker.stats().failure_count, 0);

        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stale_success_does_not_close() {
        let (breaker, _clock) = breaker(config(1, 30));

        let slow = breaker.try_acquire().unwrap();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        slow.record_success();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().total_successes, 1);
    }

    #[tokio::test]
    async fn test_reset_and_force_open() {
        let (breaker, clock) = breaker(config(1, 30));

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_err!(succeed(&breaker).await);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().last_failure_time, None);
        assert!(succeed(&breaker).await.is_ok());

        breaker.force_open();
        clock.advance(Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_three_failures_sixty_seconds_scenario() {
        let (breaker, clock) = breaker(config(3, 60));

        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(59));
        assert!(matches!(
            succeed(&breaker).await,
            Err(GuardError::Rejected(Rejection::CircuitOpen { .. }))
        ));

        clock.advance(Duration::from_secs(1));
        assert!(succeed(&breaker).await.is_ok());

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
    }
}
