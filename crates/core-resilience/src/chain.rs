//! Guard pipeline in front of a handler
//!
//! ```text
//! execute(key, handler, payload)
//!   │
//!   ├─ RateLimiter.is_allowed(key) ── denied ──> Rejection::RateLimited
//!   │
//!   ├─ Bulkhead.acquire()  ───────── timeout ──> Rejection::BulkheadFull
//!   │     │
//!   │     ├─ CircuitBreaker.try_acquire() ─ open ─> Rejection::CircuitOpen
//!   │     │                                         / HalfOpenLimit
//!   │     ├─ handler.handle(payload)
//!   │     └─ breaker records the outcome
//!   │
//!   └─ bulkhead permit released with the outcome, on every path
//! ```
//!
//! Every stage is optional. The chain never retries.

use super::bulkhead::{Bulkhead, BulkheadConfig};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::error::{Classify, ConfigError, GuardError, Rejection};
use super::rate_limiter::{RateLimitConfig, RateLimiter};
use super::registry::GuardRegistry;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Something the chain can run once admitted
///
/// Any `Fn(P) -> impl Future<Output = Result<T, E>>` is a handler, so
/// closures work directly.
#[async_trait]
pub trait Handler<P: Send + 'static>: Send + Sync {
    /// Value returned on success
    type Output: Send;
    /// Failure type, classified for the circuit breaker
    type Error: Classify + Send;

    /// Process one payload
    async fn handle(&self, payload: P) -> Result<Self::Output, Self::Error>;
}

#[async_trait]
impl<P, F, Fut, T, E> Handler<P> for F
where
    P: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send,
    E: Classify + Send,
{
    type Output = T;
    type Error = E;

    async fn handle(&self, payload: P) -> Result<T, E> {
        (self)(payload).await
    }
}

/// Which stages a chain has, and how each is configured
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainConfig {
    /// Per-key quota; `None` skips rate limiting
    pub rate_limit: Option<RateLimitConfig>,
    /// Concurrency limit; `None` skips the bulkhead
    pub bulkhead: Option<BulkheadConfig>,
    /// Breaker settings; `None` skips the breaker
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// Rate limiter → bulkhead → circuit breaker → handler
#[derive(Debug, Clone, Default)]
pub struct GuardChain {
    name: String,
    rate_limiter: Option<Arc<RateLimiter>>,
    bulkhead: Option<Arc<Bulkhead>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl GuardChain {
    /// Create a chain with no stages
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a chain whose guards are shared through `registry` under `name`
    pub fn from_registry(
        registry: &GuardRegistry,
        name: &str,
        config: &ChainConfig,
    ) -> Result<Self, ConfigError> {
        let mut chain = Self::new(name);
        if let Some(rate) = config.rate_limit {
            chain.rate_limiter = Some(registry.rate_limiter(name, rate)?);
        }
        if let Some(bulkhead) = config.bulkhead {
            chain.bulkhead = Some(registry.bulkhead(name, bulkhead)?);
        }
        if let Some(breaker) = &config.circuit_breaker {
            chain.circuit_breaker = Some(registry.circuit_breaker(name, breaker.clone())?);
        }
        Ok(chain)
    }

    /// Put `limiter` in front of the chain
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Bound concurrency with `bulkhead`
    pub fn with_bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    /// Guard the handler with `breaker`
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Run `handler` on `payload` if every stage admits the call
    ///
    /// `key` selects the rate-limit bucket. Rejections are returned as
    /// [`GuardError::Rejected`]; handler failures as [`GuardError::Handler`],
    /// whether or not the breaker counted them.
    pub async fn execute<P, H>(
        &self,
        key: &str,
        handler: &H,
        payload: P,
    ) -> Result<H::Output, GuardError<H::Error>>
    where
        P: Send + 'static,
        H: Handler<P> + ?Sized,
    {
        if let Some(limiter) = &self.rate_limiter {
            let decision = limiter.is_allowed(key);
            if !decision.allowed {
                return Err(Rejection::RateLimited {
                    key: key.to_string(),
                    retry_after: decision.retry_after,
                }
                .into());
            }
        }

        let bulkhead_permit = match &self.bulkhead {
            Some(bulkhead) => Some(bulkhead.acquire().await?),
            None => None,
        };

        let result = self.run_breaker(handler, payload).await;

        if let Some(permit) = bulkhead_permit {
            permit.release(result.is_ok());
        }
        if let Err(GuardError::Rejected(rejection)) = &result {
            debug!(chain = %self.name, kind = rejection.kind().as_str(), "call rejected");
        }
        result
    }

    async fn run_breaker<P, H>(
        &self,
        handler: &H,
        payload: P,
    ) -> Result<H::Output, GuardError<H::Error>>
    where
        P: Send + 'static,
        H: Handler<P> + ?Sized,
    {
        let Some(breaker) = &self.circuit_breaker else {
            return handler.handle(payload).await.map_err(GuardError::Handler);
        };

        let permit = breaker.try_acquire()?;
        match handler.handle(payload).await {
            Ok(output) => {
                permit.record_success();
                Ok(output)
            }
            Err(e) => {
                permit.record_failure(&e);
                Err(GuardError::Handler(e))
            }
        }
    }

    /// Chain name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rate-limit stage, if configured
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Bulkhead stage, if configured
    pub fn bulkhead(&self) -> Option<&Arc<Bulkhead>> {
        self.bulkhead.as_ref()
    }

    /// Circuit breaker stage, if configured
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }
}
