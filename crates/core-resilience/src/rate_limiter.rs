//! Sliding-window rate limiting per key
//!
//! Each key keeps a log of the instants at which it was admitted. A request
//! is allowed when fewer than `requests_per_window` entries fall inside the
//! window `(now - window_size, now]`. Keys are created lazily and never
//! influence each other.
//!
//! Keys whose logs have fully expired are swept from `is_allowed` whenever
//! the number of tracked keys doubles since the last sweep (and is at least
//! [`SWEEP_MIN_KEYS`]), so memory follows the set of recently active keys.
//! [`RateLimiter::purge_expired`] runs the same sweep on demand.
//!
//! ```text
//! window_size = 60s, requests_per_window = 3
//!
//! t=0   t=10  t=20  t=30        t=60  t=61
//!  ✓     ✓     ✓     ✗ (retry    ✓     ✗
//!                       after 30s)
//! ```
//!
//! # Example
//!
//! ```
//! use rampart_core_resilience::rate_limiter::{RateLimitConfig, RateLimiter};
//!
//! let config: RateLimitConfig = "2/minute".parse().unwrap();
//! let limiter = RateLimiter::new("login", config);
//!
//! assert!(limiter.is_allowed("alice").allowed);
//! assert!(limiter.is_allowed("alice").allowed);
//! assert!(!limiter.is_allowed("alice").allowed);
//! assert!(limiter.is_allowed("bob").allowed);
//! ```

use super::clock::{system_clock, Clock};
use super::error::ConfigError;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Quota for a rate limiter: `requests_per_window` per `window_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Admissions allowed per key inside one window
    pub requests_per_window: u32,
    /// Length of the sliding window
    pub window_size: Duration,
}

impl RateLimitConfig {
    /// Create a quota, rejecting zero counts and empty windows
    pub fn new(requests_per_window: u32, window_size: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            requests_per_window,
            window_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// `n` requests per second
    pub fn per_second(n: u32) -> Self {
        Self {
            requests_per_window: n,
            window_size: Duration::from_secs(1),
        }
    }

    /// `n` requests per minute
    pub fn per_minute(n: u32) -> Self {
        Self {
            requests_per_window: n,
            window_size: Duration::from_secs(60),
        }
    }

    /// `n` requests per hour
    pub fn per_hour(n: u32) -> Self {
        Self {
            requests_per_window: n,
            window_size: Duration::from_secs(3600),
        }
    }

    /// `n` requests per day
    pub fn per_day(n: u32) -> Self {
        Self {
            requests_per_window: n,
            window_size: Duration::from_secs(86_400),
        }
    }

    /// Check that the quota can admit anything at all
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_window == 0 {
            return Err(ConfigError::MustBePositive {
                field: "requests_per_window",
            });
        }
        if self.window_size.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "window_size",
            });
        }
        Ok(())
    }
}

/// Seconds per unit accepted by the compact `"<N>/<unit>"` form
fn unit_seconds(unit: &str) -> Option<u64> {
    match unit {
        "second" | "seconds" | "sec" | "s" => Some(1),
        "minute" | "minutes" | "min" | "m" => Some(60),
        "hour" | "hours" | "h" => Some(3600),
        "day" | "days" | "d" => Some(86_400),
        _ => None,
    }
}

/// Parse a compact rate such as `"100/minute"`
pub fn parse_rate(input: &str) -> Result<RateLimitConfig, ConfigError> {
    let trimmed = input.trim();
    let (count, unit) = trimmed
        .split_once('/')
        .ok_or_else(|| ConfigError::invalid_rate(input, "expected '<N>/<unit>'"))?;

    let requests_per_window: u32 = count
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_rate(input, "count is not a non-negative integer"))?;
    if requests_per_window == 0 {
        return Err(ConfigError::invalid_rate(input, "count must be greater than 0"));
    }

    let unit = unit.trim().to_ascii_lowercase();
    let seconds = unit_seconds(&unit).ok_or_else(|| {
        ConfigError::invalid_rate(
            input,
            format!("unknown unit '{}', expected second|minute|hour|day", unit),
        )
    })?;

    Ok(RateLimitConfig {
        requests_per_window,
        window_size: Duration::from_secs(seconds),
    })
}

impl FromStr for RateLimitConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_rate(s)
    }
}

/// Admission decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Admissions still available in the current window
    pub remaining: u32,
    /// How long until the oldest admission leaves the window; zero when allowed
    pub retry_after: Duration,
}

/// Per-key sliding-window rate limiter
///
/// Admission decisions for all keys are serialised by one mutex, so no key
/// can exceed its quota under concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    /// Key count that triggers the next sweep; only touched under `windows`
    sweep_at: AtomicUsize,
}

/// Fewest tracked keys at which `is_allowed` sweeps expired ones
pub const SWEEP_MIN_KEYS: usize = 1024;

impl RateLimiter {
    /// Create a limiter on the system clock
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    /// Create a limiter on a caller-supplied clock
    pub fn with_clock(name: impl Into<String>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
            sweep_at: AtomicUsize::new(SWEEP_MIN_KEYS),
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether one more request for `key` fits, and record it if so
    pub fn is_allowed(&self, key: &str) -> RateLimitResult {
        let now = self.clock.now();
        let mut windows = self.windows();

        if windows.len() >= self.sweep_at.load(Ordering::Relaxed) && !windows.contains_key(key)
        {
            let dropped = sweep(&mut windows, now, self.config.window_size);
            self.sweep_at
                .store((windows.len() * 2).max(SWEEP_MIN_KEYS), Ordering::Relaxed);
            debug!(
                limiter = %self.name,
                dropped,
                remaining = windows.len(),
                "swept expired rate-limit keys"
            );
        }

        let log = windows.entry(key.to_string()).or_insert_with(|| {
            debug!(limiter = %self.name, key, "tracking new rate-limit key");
            VecDeque::new()
        });
        evict(log, now, self.config.window_size);

        let limit = self.config.requests_per_window as usize;
        if log.len() < limit {
            log.push_back(now);
            RateLimitResult {
                allowed: true,
                remaining: (limit - log.len()) as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            let retry_after = retry_after(log, now, self.config.window_size);
            warn!(
                limiter = %self.name,
                key,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after,
            }
        }
    }

    /// What `is_allowed` would answer right now, without recording anything
    pub fn peek(&self, key: &str) -> RateLimitResult {
        let now = self.clock.now();
        let windows = self.windows();
        let limit = self.config.requests_per_window as usize;

        let in_window: VecDeque<Instant> = windows
            .get(key)
            .map(|log| {
                log.iter()
                    .copied()
                    .filter(|t| now.duration_since(*t) < self.config.window_size)
                    .collect()
            })
            .unwrap_or_default();

        if in_window.len() < limit {
            RateLimitResult {
                allowed: true,
                remaining: (limit - in_window.len()) as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after: retry_after(&in_window, now, self.config.window_size),
            }
        }
    }

    /// Forget all admissions recorded for `key`
    pub fn reset(&self, key: &str) {
        if self.windows().remove(key).is_some() {
            debug!(limiter = %self.name, key, "rate-limit key reset");
        }
    }

    /// Forget every key
    pub fn reset_all(&self) {
        self.windows().clear();
    }

    /// Drop keys whose logs have fully expired; returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows();
        sweep(&mut windows, now, self.config.window_size)
    }

    /// Number of keys currently holding state
    pub fn tracked_keys(&self) -> usize {
        self.windows().len()
    }

    /// Limiter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quota this limiter enforces
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// Drop keys with no admissions left in the window; returns how many
fn sweep(windows: &mut HashMap<String, VecDeque<Instant>>, now: Instant, window: Duration) -> usize {
    let before = windows.len();
    windows.retain(|_, log| {
        evict(log, now, window);
        !log.is_empty()
    });
    before - windows.len()
}

/// Drop log entries that have left the window ending at `now`
fn evict(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = log.front() {
        if now.duration_since(*oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

/// Time until the oldest in-window entry expires; always in `(0, window]`
fn retry_after(log: &VecDeque<Instant>, now: Instant, window: Duration) -> Duration {
    log.front()
        .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
        .filter(|d| !d.is_zero())
        .unwrap_or(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(n: u32, window: Duration) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(
            "test",
            RateLimitConfig {
                requests_per_window: n,
                window_size: window,
            },
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[test]
    fn test_first_n_allowed_with_decreasing_remaining() {
        let (limiter, _clock) = limiter(5, Duration::from_secs(60));

        let remaining: Vec<u32> = (0..5)
            .map(|_| {
                let result = limiter.is_allowed("k");
                assert!(result.allowed);
                assert_eq!(result.retry_after, Duration::ZERO);
                result.remaining
            })
            .collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let rejected = limiter.is_allowed("k");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.retry_after > Duration::ZERO);
        assert!(rejected.retry_after <= Duration::from_secs(60));
    }

    #[test]
    fn test_retry_after_tracks_oldest_entry() {
        let (limiter, clock) = limiter(2, Duration::from_secs(60));

        limiter.is_allowed("k");
        clock.advance(Duration::from_secs(20));
        limiter.is_allowed("k");
        clock.advance(Duration::from_secs(10));

        let rejected = limiter.is_allowed("k");
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, Duration::from_secs(30));
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter(2, Duration::from_secs(60));

        assert!(limiter.is_allowed("k").allowed);
        clock.advance(Duration::from_secs(30));
        assert!(limiter.is_allowed("k").allowed);
        assert!(!limiter.is_allowed("k").allowed);

        // First entry leaves the window exactly at t=60
        clock.advance(Duration::from_secs(30));
        let result = limiter.is_allowed("k");
        assert!(result.allowed);
        assert_eq!(result.remaining, 0);
        assert!(!limiter.is_allowed("k").allowed);
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let (limiter, clock) = limiter(1, Duration::from_secs(10));

        assert!(limiter.is_allowed("k").allowed);
        for _ in 0..5 {
            assert!(!limiter.is_allowed("k").allowed);
        }
        clock.advance(Duration::from_secs(10));
        assert!(limiter.is_allowed("k").allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter(2, Duration::from_secs(60));

        limiter.is_allowed("a");
        limiter.is_allowed("a");
        assert!(!limiter.is_allowed("a").allowed);

        let b = limiter.is_allowed("b");
        assert!(b.allowed);
        assert_eq!(b.remaining, 1);
    }

    #[test]
    fn test_reset_readmits_key() {
        let (limiter, _clock) = limiter(1, Duration::from_secs(3600));

        limiter.is_allowed("k");
        assert!(!limiter.is_allowed("k").allowed);

        limiter.reset("k");
        assert!(limiter.is_allowed("k").allowed);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (limiter, _clock) = limiter(2, Duration::from_secs(60));

        assert_eq!(limiter.peek("k").remaining, 2);
        assert_eq!(limiter.peek("k").remaining, 2);
        limiter.is_allowed("k");
        assert_eq!(limiter.peek("k").remaining, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_purge_expired_drops_idle_keys() {
        let (limiter, clock) = limiter(3, Duration::from_secs(5));

        limiter.is_allowed("old");
        clock.advance(Duration::from_secs(4));
        limiter.is_allowed("fresh");
        clock.advance(Duration::from_secs(1));

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_idle_keys_swept_as_new_keys_arrive() {
        let (limiter, clock) = limiter(1, Duration::from_secs(10));

        for i in 0..SWEEP_MIN_KEYS {
            assert!(limiter.is_allowed(&format!("burst-{}", i)).allowed);
        }
        assert_eq!(limiter.tracked_keys(), SWEEP_MIN_KEYS);

        // Known keys never trigger a sweep
        assert!(!limiter.is_allowed("burst-0").allowed);
        assert_eq!(limiter.tracked_keys(), SWEEP_MIN_KEYS);

        clock.advance(Duration::from_secs(10));
        assert!(limiter.is_allowed("late").allowed);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_sweep_keeps_active_keys() {
        let (limiter, clock) = limiter(1, Duration::from_secs(10));

        for i in 0..SWEEP_MIN_KEYS {
            limiter.is_allowed(&format!("key-{}", i));
        }
        limiter.is_allowed("next");
        assert_eq!(limiter.tracked_keys(), SWEEP_MIN_KEYS + 1);

        clock.advance(Duration::from_secs(5));
        assert!(!limiter.is_allowed("key-7").allowed);
        assert!(!limiter.is_allowed("next").allowed);
    }

    #[test]
    fn test_parse_rate_units() {
        let cases = [
            ("10/second", 10, 1),
            ("100/minute", 100, 60),
            ("1000/hour", 1000, 3600),
            ("5/day", 5, 86_400),
            (" 7 / Minutes ", 7, 60),
        ];
        for (input, n, secs) in cases {
            let config = parse_rate(input).unwrap();
            assert_eq!(config.requests_per_window, n, "{}", input);
            assert_eq!(config.window_size, Duration::from_secs(secs), "{}", input);
        }
    }

    #[test]
    fn test_parse_rate_rejects_garbage() {
        for input in ["", "100", "ten/minute", "0/minute", "5/fortnight", "-1/second"] {
            assert!(
                matches!(parse_rate(input), Err(ConfigError::InvalidRate { .. })),
                "{} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimitConfig::new(0, Duration::from_secs(1)).is_err());
        assert!(RateLimitConfig::new(1, Duration::ZERO).is_err());
        assert_eq!(
            RateLimitConfig::new(60, Duration::from_secs(60)).unwrap(),
            RateLimitConfig::per_minute(60)
        );
        assert_eq!(RateLimitConfig::per_day(1).window_size, Duration::from_secs(86_400));
    }

    #[test]
    fn test_concurrent_callers_never_exceed_quota() {
        let clock = ManualClock::new();
        let limiter = Arc::new(RateLimiter::with_clock(
            "concurrent",
            RateLimitConfig::per_minute(100),
            Arc::new(clock),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50).filter(|_| limiter.is_allowed("shared").allowed).count()
                })
            })
            .collect();

        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .sum();
        assert_eq!(admitted, 100);
    }
}
