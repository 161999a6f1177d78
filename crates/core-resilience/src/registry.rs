//! Named guard instances shared across callers
//!
//! A [`GuardRegistry`] hands out one `Arc` per `(kind, name)` pair. The
//! first `get_or_create` call for a name builds the guard from its config;
//! later calls return the same instance and ignore the config they pass.
//!
//! Registries are ordinary values. Clone one to share it, or build a fresh
//! one per test for isolation.

use super::bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::clock::{system_clock, Clock};
use super::error::ConfigError;
use super::rate_limiter::{RateLimitConfig, RateLimiter};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

type Slot<G> = RwLock<HashMap<String, Arc<G>>>;

/// Kinds of guard a registry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    /// [`RateLimiter`]
    RateLimiter,
    /// [`Bulkhead`]
    Bulkhead,
    /// [`CircuitBreaker`]
    CircuitBreaker,
}

impl GuardKind {
    /// Lowercase name for logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardKind::RateLimiter => "rate_limiter",
            GuardKind::Bulkhead => "bulkhead",
            GuardKind::CircuitBreaker => "circuit_breaker",
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::RateLimiter {}
    impl Sealed for super::Bulkhead {}
    impl Sealed for super::CircuitBreaker {}
}

/// A guard type the registry knows how to build and store
pub trait RegistryGuard: sealed::Sealed + Send + Sync + Sized + 'static {
    /// Configuration used on first creation
    type Config: Clone + Debug + PartialEq;

    /// Which map this guard lives in
    const KIND: GuardKind;

    /// Check a config before building from it
    fn validate_config(config: &Self::Config) -> Result<(), ConfigError>;

    /// Build a new instance
    fn build(name: &str, config: Self::Config, clock: Arc<dyn Clock>) -> Self;

    /// Configuration of an existing instance
    fn current_config(&self) -> &Self::Config;

    #[doc(hidden)]
    fn slot(registry: &GuardRegistry) -> &Slot<Self>;
}

impl RegistryGuard for RateLimiter {
    type Config = RateLimitConfig;
    const KIND: GuardKind = GuardKind::RateLimiter;

    fn validate_config(config: &Self::Config) -> Result<(), ConfigError> {
        config.validate()
    }

    fn build(name: &str, config: Self::Config, clock: Arc<dyn Clock>) -> Self {
        RateLimiter::with_clock(name, config, clock)
    }

    fn current_config(&self) -> &Self::Config {
        self.config()
    }

    fn slot(registry: &GuardRegistry) -> &Slot<Self> {
        &registry.rate_limiters
    }
}

impl RegistryGuard for Bulkhead {
    type Config = BulkheadConfig;
    const KIND: GuardKind = GuardKind::Bulkhead;

    fn validate_config(config: &Self::Config) -> Result<(), ConfigError> {
        config.validate()
    }

    fn build(name: &str, config: Self::Config, _clock: Arc<dyn Clock>) -> Self {
        Bulkhead::new(name, config)
    }

    fn current_config(&self) -> &Self::Config {
        self.config()
    }

    fn slot(registry: &GuardRegistry) -> &Slot<Self> {
        &registry.bulkheads
    }
}

impl RegistryGuard for CircuitBreaker {
    type Config = CircuitBreakerConfig;
    const KIND: GuardKind = GuardKind::CircuitBreaker;

    fn validate_config(config: &Self::Config) -> Result<(), ConfigError> {
        config.validate()
    }

    fn build(name: &str, config: Self::Config, clock: Arc<dyn Clock>) -> Self {
        CircuitBreaker::with_clock(name, config, clock)
    }

    fn current_config(&self) -> &Self::Config {
        self.config()
    }

    fn slot(registry: &GuardRegistry) -> &Slot<Self> {
        &registry.circuit_breakers
    }
}

/// Snapshot of every guard in a registry, sorted by name
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// `(name, quota, keys currently tracked)`
    pub rate_limiters: Vec<(String, RateLimitConfig, usize)>,
    /// `(name, counters)`
    pub bulkheads: Vec<(String, BulkheadStats)>,
    /// `(name, counters)`
    pub circuit_breakers: Vec<(String, CircuitBreakerStats)>,
}

/// Owns named guard instances, one per `(kind, name)`
#[derive(Debug, Clone)]
pub struct GuardRegistry {
    clock: Arc<dyn Clock>,
    rate_limiters: Arc<Slot<RateLimiter>>,
    bulkheads: Arc<Slot<Bulkhead>>,
    circuit_breakers: Arc<Slot<CircuitBreaker>>,
}

impl GuardRegistry {
    /// Create an empty registry on the system clock
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create an empty registry whose guards read `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rate_limiters: Arc::new(RwLock::new(HashMap::new())),
            bulkheads: Arc::new(RwLock::new(HashMap::new())),
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the guard registered under `name`, creating it from `config`
    /// if it does not exist yet
    ///
    /// Concurrent first calls for one name build exactly one instance.
    /// The config is validated only when a new guard is built.
    pub fn get_or_create<G: RegistryGuard>(
        &self,
        name: &str,
        config: G::Config,
    ) -> Result<Arc<G>, ConfigError> {
        if let Some(existing) = self.get::<G>(name) {
            Self::note_config_mismatch::<G>(&existing, name, &config);
            return Ok(existing);
        }

        G::validate_config(&config)?;

        let mut guards = G::slot(self)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = guards.get(name) {
            Self::note_config_mismatch::<G>(existing, name, &config);
            return Ok(Arc::clone(existing));
        }

        debug!(kind = G::KIND.as_str(), name, "Registering guard");
        let guard = Arc::new(G::build(name, config, Arc::clone(&self.clock)));
        guards.insert(name.to_string(), Arc::clone(&guard));
        Ok(guard)
    }

    fn note_config_mismatch<G: RegistryGuard>(existing: &G, name: &str, config: &G::Config) {
        if existing.current_config() != config {
            warn!(
                kind = G::KIND.as_str(),
                name,
                "Guard already registered with a different config; keeping the original"
            );
        }
    }

    /// Rate limiter for `name`
    pub fn rate_limiter(
        &self,
        name: &str,
        config: RateLimitConfig,
    ) -> Result<Arc<RateLimiter>, ConfigError> {
        self.get_or_create(name, config)
    }

    /// Bulkhead for `name`
    pub fn bulkhead(
        &self,
        name: &str,
        config: BulkheadConfig,
    ) -> Result<Arc<Bulkhead>, ConfigError> {
        self.get_or_create(name, config)
    }

    /// Circuit breaker for `name`
    pub fn circuit_breaker(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        self.get_or_create(name, config)
    }

    /// Find a guard by name
    pub fn get<G: RegistryGuard>(&self, name: &str) -> Option<Arc<G>> {
        let guards = G::slot(self).read().unwrap_or_else(PoisonError::into_inner);
        guards.get(name).cloned()
    }

    /// Sorted names of all guards of one kind
    pub fn names<G: RegistryGuard>(&self) -> Vec<String> {
        let guards = G::slot(self).read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = guards.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a guard by name, returning it
    ///
    /// Callers still holding the `Arc` keep a working guard; the next
    /// `get_or_create` builds a fresh one.
    pub fn remove<G: RegistryGuard>(&self, name: &str) -> Option<Arc<G>> {
        let mut guards = G::slot(self)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guards.remove(name)
    }

    /// Number of registered guards across all kinds
    pub fn len(&self) -> usize {
        self.names::<RateLimiter>().len()
            + self.names::<Bulkhead>().len()
            + self.names::<CircuitBreaker>().len()
    }

    /// True when no guard is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a snapshot of every guard's state
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::default();

        for (name, limiter) in self.sorted::<RateLimiter>() {
            snapshot
                .rate_limiters
                .push((name, *limiter.config(), limiter.tracked_keys()));
        }
        for (name, bulkhead) in self.sorted::<Bulkhead>() {
            snapshot.bulkheads.push((name, bulkhead.stats()));
        }
        for (name, breaker) in self.sorted::<CircuitBreaker>() {
            snapshot.circuit_breakers.push((name, breaker.stats()));
        }

        snapshot
    }

    fn sorted<G: RegistryGuard>(&self) -> Vec<(String, Arc<G>)> {
        let guards = G::slot(self).read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, Arc<G>)> = guards
            .iter()
            .map(|(name, guard)| (name.clone(), Arc::clone(guard)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Default for GuardRegistry {
    fn default() -> Self {
        Self::new()
    }
}
