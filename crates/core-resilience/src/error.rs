//! Error types for guard operations
//!
//! Two layers:
//! - [`Rejection`]: a guard refused to admit the call. Always recoverable by
//!   the caller, usually after waiting `retry_after`.
//! - [`GuardError`]: either a `Rejection` or the handler's own failure `E`,
//!   passed through untouched.
//!
//! [`ConfigError`] covers invalid guard configuration.

use std::borrow::Cow;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for guarded calls
pub type GuardResult<T, E> = std::result::Result<T, GuardError<E>>;

/// Which guard rejected a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// Rate limiter quota exhausted for the key
    RateLimited,
    /// Bulkhead permit not obtained within the wait budget
    BulkheadFull,
    /// Circuit breaker is failing fast
    CircuitOpen,
    /// Circuit breaker has no free probe slot
    HalfOpenLimit,
}

impl RejectionKind {
    /// Load-shedding rejections (rate limit or bulkhead)
    pub fn is_admission(&self) -> bool {
        matches!(self, RejectionKind::RateLimited | RejectionKind::BulkheadFull)
    }

    /// Circuit breaker rejections (open or probe limit)
    pub fn is_circuit(&self) -> bool {
        matches!(
            self,
            RejectionKind::CircuitOpen | RejectionKind::HalfOpenLimit
        )
    }

    /// Stable lowercase name, used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::RateLimited => "rate_limited",
            RejectionKind::BulkheadFull => "bulkhead_full",
            RejectionKind::CircuitOpen => "circuit_open",
            RejectionKind::HalfOpenLimit => "half_open_limit",
        }
    }
}

/// A guard refused to admit a call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Too many requests for this key in the current window
    #[error("rate limit exceeded for key '{key}', retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    /// No bulkhead permit became free within `max_wait`
    #[error("bulkhead '{name}' is full (waited {max_wait:?})")]
    BulkheadFull { name: String, max_wait: Duration },

    /// The circuit is open; calls fail fast until `recovery_time`
    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        name: String,
        recovery_time: Instant,
        retry_after: Duration,
    },

    /// The circuit is half-open and every probe slot is taken
    #[error("circuit breaker '{name}' is half-open and its probe limit is reached")]
    HalfOpenLimit { name: String },
}

impl Rejection {
    /// Which guard produced this rejection
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::RateLimited { .. } => RejectionKind::RateLimited,
            Rejection::BulkheadFull { .. } => RejectionKind::BulkheadFull,
            Rejection::CircuitOpen { .. } => RejectionKind::CircuitOpen,
            Rejection::HalfOpenLimit { .. } => RejectionKind::HalfOpenLimit,
        }
    }

    /// Suggested back-off before the caller tries again, when one is known
    ///
    /// Bulkhead and half-open rejections carry no hint: capacity frees up
    /// whenever an in-flight call finishes.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Rejection::RateLimited { retry_after, .. }
            | Rejection::CircuitOpen { retry_after, .. } => Some(*retry_after),
            Rejection::BulkheadFull { .. } | Rejection::HalfOpenLimit { .. } => None,
        }
    }
}

/// Outcome of a guarded call that did not succeed
#[derive(Error, Debug)]
pub enum GuardError<E> {
    /// A guard rejected the call before the handler ran
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The handler ran and failed
    #[error("handler failed: {0}")]
    Handler(E),
}

impl<E> GuardError<E> {
    /// True when a guard refused the call
    pub fn is_rejection(&self) -> bool {
        matches!(self, GuardError::Rejected(_))
    }

    /// The rejection, if a guard refused the call
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            GuardError::Rejected(r) => Some(r),
            GuardError::Handler(_) => None,
        }
    }

    /// The handler's error, if the handler ran and failed
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            GuardError::Handler(e) => Some(e),
            GuardError::Rejected(_) => None,
        }
    }

    /// Back-off hint carried by the rejection, if any
    pub fn retry_after(&self) -> Option<Duration> {
        self.rejection().and_then(Rejection::retry_after)
    }

    /// Map the handler error type, keeping rejections as they are
    pub fn map_handler<F, E2>(self, f: F) -> GuardError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            GuardError::Rejected(r) => GuardError::Rejected(r),
            GuardError::Handler(e) => GuardError::Handler(f(e)),
        }
    }
}

/// Invalid guard configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric setting that must be positive was zero
    #[error("{field} must be greater than 0")]
    MustBePositive { field: &'static str },

    /// A rate string did not match `<N>/<unit>`
    #[error("invalid rate '{input}': {reason}")]
    InvalidRate { input: String, reason: String },

    /// A duration field was negative or not finite
    #[error("invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: String },

    /// A setting was larger than the guard can represent
    #[error("{field} exceeds the maximum of {max}")]
    ExceedsMaximum { field: &'static str, max: String },
}

impl ConfigError {
    /// Create an invalid rate error
    pub fn invalid_rate<S: Into<String>, R: Into<String>>(input: S, reason: R) -> Self {
        ConfigError::InvalidRate {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Classifies handler errors for the circuit breaker's monitored set
///
/// The breaker only counts failures whose kind is monitored; other errors
/// propagate to the caller without touching breaker state.
pub trait Classify {
    /// Short, stable name of this error's kind (e.g. `"timeout"`)
    fn error_kind(&self) -> Cow<'_, str>;
}

impl Classify for std::io::Error {
    fn error_kind(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{:?}", self.kind()))
    }
}

impl Classify for std::convert::Infallible {
    fn error_kind(&self) -> Cow<'_, str> {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_kind_groups() {
        assert!(RejectionKind::RateLimited.is_admission());
        assert!(RejectionKind::BulkheadFull.is_admission());
        assert!(!RejectionKind::CircuitOpen.is_admission());
        assert!(RejectionKind::CircuitOpen.is_circuit());
        assert!(RejectionKind::HalfOpenLimit.is_circuit());
        assert_eq!(RejectionKind::HalfOpenLimit.as_str(), "half_open_limit");
    }

    #[test]
    fn test_rate_limited_message_and_hint() {
        let r = Rejection::RateLimited {
            key: "user-1".to_string(),
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(r.kind(), RejectionKind::RateLimited);
        assert_eq!(r.retry_after(), Some(Duration::from_secs(3)));
        assert!(r.to_string().contains("user-1"));
    }

    #[test]
    fn test_bulkhead_rejection_has_no_hint() {
        let r = Rejection::BulkheadFull {
            name: "db".to_string(),
            max_wait: Duration::from_millis(10),
        };
        assert_eq!(r.retry_after(), None);
        assert!(r.to_string().contains("db"));
    }

    #[test]
    fn test_guard_error_accessors() {
        let rejected: GuardError<std::io::Error> = Rejection::HalfOpenLimit {
            name: "api".to_string(),
        }
        .into();
        assert!(rejected.is_rejection());
        assert_eq!(
            rejected.rejection().map(Rejection::kind),
            Some(RejectionKind::HalfOpenLimit)
        );
        assert!(rejected.into_handler_error().is_none());

        let failed: GuardError<&str> = GuardError::Handler("boom");
        assert!(!failed.is_rejection());
        assert_eq!(failed.to_string(), "handler failed: boom");
        assert_eq!(failed.map_handler(str::len).into_handler_error(), Some(4));
    }

    #[test]
    fn test_io_error_kind() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(err.error_kind(), "TimedOut");
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::MustBePositive {
            field: "max_concurrent",
        };
        assert_eq!(err.to_string(), "max_concurrent must be greater than 0");

        let err = ConfigError::invalid_rate("ten/minute", "count is not a number");
        assert!(err.to_string().contains("ten/minute"));
    }
}
