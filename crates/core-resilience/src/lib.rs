//! Rampart Core Resilience: Pure-logic admission guards
//!
//! # Overview
//!
//! This crate provides the three guards Rampart puts in front of a handler,
//! plus the pipeline that composes them:
//!
//! - **Rate Limiter**: Per-key sliding-window quota (`"100/minute"`)
//! - **Bulkhead**: Bounded concurrency per named resource, with a wait budget
//! - **Circuit Breaker**: Fails fast while a downstream keeps failing
//! - **Guard Chain**: Rate limiter → bulkhead → circuit breaker → handler
//! - **Guard Registry**: One shared instance per `(kind, name)`
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Transports (HTTP, message buses)
//! - Configuration files or environment
//! - Application-specific error types (see [`Classify`])
//!
//! Time comes from a [`Clock`], so every timeout can be driven by a
//! [`ManualClock`] in tests. There are no global singletons: guards live in
//! a [`GuardRegistry`] value owned by the host.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Caller: execute(key, payload)   │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Shed load per key
//! │  (Sliding window, retry_after hint)     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Bulkhead                          │  ← Bound concurrency
//! │  (Semaphore, max_wait, RAII permit)     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Closed / Open / HalfOpen probes)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!            Handler
//! ```
//!
//! Each stage can reject before the handler runs. Rejections are values
//! ([`Rejection`]), never panics, and the chain never retries.
//!
//! # Usage Example
//!
//! ```no_run
//! use rampart_core_resilience::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), GuardError<std::io::Error>> {
//! let registry = GuardRegistry::new();
//! let chain = GuardChain::from_registry(
//!     &registry,
//!     "orders",
//!     &ChainConfig {
//!         rate_limit: Some("100/minute".parse().expect("valid rate")),
//!         bulkhead: Some(BulkheadConfig {
//!             max_concurrent: 10,
//!             max_wait: Duration::from_secs(5),
//!         }),
//!         circuit_breaker: Some(CircuitBreakerConfig::default()),
//!     },
//! )
//! .expect("valid config");
//!
//! let place_order = |qty: u32| async move { Ok::<_, std::io::Error>(qty) };
//!
//! match chain.execute("customer-42", &place_order, 3).await {
//!     Ok(qty) => println!("placed {qty}"),
//!     Err(GuardError::Rejected(r)) => println!("rejected, retry after {:?}", r.retry_after()),
//!     Err(GuardError::Handler(e)) => return Err(GuardError::Handler(e)),
//! }
//! # Ok(())
//! # }
//! ```

pub mod bulkhead;
pub mod chain;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod rate_limiter;
pub mod registry;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadState, BulkheadStats};
pub use chain::{ChainConfig, GuardChain, Handler};
pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    MonitoredErrors, MAX_RECOVERY_TIMEOUT,
};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use error::{Classify, ConfigError, GuardError, GuardResult, Rejection, RejectionKind};
pub use rate_limiter::{
    parse_rate, RateLimitConfig, RateLimitResult, RateLimiter, SWEEP_MIN_KEYS,
};
pub use registry::{GuardKind, GuardRegistry, RegistryGuard, RegistrySnapshot};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bulkhead::{Bulkhead, BulkheadConfig, BulkheadState};
    pub use crate::chain::{ChainConfig, GuardChain, Handler};
    pub use crate::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, MonitoredErrors,
    };
    pub use crate::clock::Clock;
    pub use crate::error::{Classify, GuardError, Rejection, RejectionKind};
    pub use crate::rate_limiter::{RateLimitConfig, RateLimiter};
    pub use crate::registry::GuardRegistry;
}
