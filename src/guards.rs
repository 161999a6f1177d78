/*!
 * Named guard chains built from configuration
 */

use crate::config::RampartConfig;
use crate::error::{RampartError, Result};
use rampart_core_resilience::{GuardChain, GuardRegistry};
use std::collections::BTreeMap;
use tracing::info;

/// One [`GuardChain`] per configured guard
///
/// Guard instances live in the registry, so two sets built from the same
/// registry share rate-limit windows, permits and breaker state.
#[derive(Debug, Clone)]
pub struct GuardSet {
    registry: GuardRegistry,
    chains: BTreeMap<String, GuardChain>,
}

impl GuardSet {
    /// Build every guard in `config`, validating as it goes
    pub fn from_config(config: &RampartConfig, registry: &GuardRegistry) -> Result<Self> {
        let mut chains = BTreeMap::new();

        for (name, guard) in &config.guards {
            let chain_config = guard
                .to_chain_config()
                .map_err(|e| RampartError::config(name, e))?;
            let chain = GuardChain::from_registry(registry, name, &chain_config)
                .map_err(|e| RampartError::config(name, e))?;

            info!(
                guard = %name,
                rate_limit = chain.rate_limiter().is_some(),
                bulkhead = chain.bulkhead().is_some(),
                circuit_breaker = chain.circuit_breaker().is_some(),
                "Guard ready"
            );
            chains.insert(name.clone(), chain);
        }

        Ok(Self {
            registry: registry.clone(),
            chains,
        })
    }

    /// Chain for a named guard
    pub fn chain(&self, name: &str) -> Result<&GuardChain> {
        self.chains
            .get(name)
            .ok_or_else(|| RampartError::UnknownGuard(name.to_string()))
    }

    /// Configured guard names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    /// Iterate over `(name, chain)` pairs, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GuardChain)> {
        self.chains.iter().map(|(name, chain)| (name.as_str(), chain))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Registry the guards were created in
    pub fn registry(&self) -> &GuardRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BulkheadSettings, GuardConfig};
    use std::sync::Arc;

    fn config_with(names: &[&str]) -> RampartConfig {
        let mut config = RampartConfig::default();
        for name in names {
            config.guards.insert(
                name.to_string(),
                GuardConfig {
                    bulkhead: Some(BulkheadSettings::default()),
                    ..Default::default()
                },
            );
        }
        config
    }

    #[test]
    fn test_builds_one_chain_per_guard() {
        let registry = GuardRegistry::new();
        let set = GuardSet::from_config(&config_with(&["b", "a"]), &registry).unwrap();

        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.len(), 2);
        assert!(set.chain("a").unwrap().bulkhead().is_some());
        assert!(matches!(
            set.chain("c"),
            Err(RampartError::UnknownGuard(_))
        ));
    }

    #[test]
    fn test_sets_share_registry_instances() {
        let registry = GuardRegistry::new();
        let config = config_with(&["db"]);
        let first = GuardSet::from_config(&config, &registry).unwrap();
        let second = GuardSet::from_config(&config, &registry).unwrap();

        assert!(Arc::ptr_eq(
            first.chain("db").unwrap().bulkhead().unwrap(),
            second.chain("db").unwrap().bulkhead().unwrap()
        ));
    }

    #[test]
    fn test_invalid_guard_fails_build() {
        let mut config = config_with(&["ok"]);
        config.guards.insert(
            "broken".to_string(),
            GuardConfig {
                bulkhead: Some(BulkheadSettings {
                    max_concurrent: 0,
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let err = GuardSet::from_config(&config, &GuardRegistry::new()).unwrap_err();
        assert!(matches!(err, RampartError::Config { ref guard, .. } if guard == "broken"));
    }
}
