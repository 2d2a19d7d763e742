//! Named breaker registry.
//!
//! # Responsibilities
//! - Lazily create one circuit breaker per dependency name
//! - Hand out retry managers paired with that breaker
//! - Snapshot and reset breakers for operators
//!
//! # Design Decisions
//! - Explicitly constructed and passed around; no process-wide global
//! - Cheap to clone (shared `Arc` inside)
//! - Per-name config overrides, falling back to registry defaults

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::GuardConfig;
use crate::resilience::backoff::RetryPolicy;
use crate::resilience::circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::retries::RetryManager;

#[derive(Debug)]
struct RegistryInner {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    policy: RetryPolicy,
}

/// Lookup table of per-dependency breakers.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), RetryPolicy::default())
    }
}

impl Registry {
    pub fn new(defaults: CircuitBreakerConfig, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                breakers: DashMap::new(),
                defaults,
                overrides: HashMap::new(),
                policy,
            }),
        }
    }

    /// Registry seeded from validated configuration, including `[breakers.*]` overrides.
    pub fn from_config(config: &GuardConfig) -> Self {
        let overrides = config
            .breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), CircuitBreakerConfig::from(breaker)))
            .collect();

        Self {
            inner: Arc::new(RegistryInner {
                breakers: DashMap::new(),
                defaults: CircuitBreakerConfig::from(&config.circuit_breaker),
                overrides,
                policy: RetryPolicy::from(&config.retry),
            }),
        }
    }

    /// The breaker for `name`, created on first lookup.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.inner.breakers.get(name) {
            return existing.value().clone();
        }

        self.inner
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .inner
                    .overrides
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.inner.defaults.clone());
                tracing::debug!(
                    breaker = %name,
                    failure_threshold = config.failure_threshold,
                    open_timeout_ms = config.open_timeout.as_millis() as u64,
                    "Creating circuit breaker"
                );
                Arc::new(CircuitBreaker::new(name, config))
            })
            .value()
            .clone()
    }

    /// The breaker for `name` if it has been created.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.inner.breakers.get(name).map(|b| b.value().clone())
    }

    /// Retry manager bound to the breaker for `name`, using the default policy.
    pub fn retry_manager(&self, name: &str) -> RetryManager {
        self.retry_manager_with_policy(name, self.inner.policy.clone())
    }

    pub fn retry_manager_with_policy(&self, name: &str, policy: RetryPolicy) -> RetryManager {
        RetryManager::new(policy, Some(self.breaker(name)))
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Names of all breakers created so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stats for every breaker, sorted by name.
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<_> = self.inner.breakers.iter().map(|e| e.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reset one breaker. Returns false if no breaker has that name.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in self.inner.breakers.iter() {
            entry.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::error::Error;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::time::Duration;

    #[test]
    fn test_lazy_creation_returns_same_breaker() {
        let registry = Registry::default();
        assert!(registry.get("exchange_api").is_none());

        let a = registry.breaker("exchange_api");
        let b = registry.breaker("exchange_api");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["exchange_api".to_string()]);
    }

    #[test]
    fn test_dependencies_fail_in_isolation() {
        let registry = Registry::new(
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(60),
            },
            RetryPolicy::default(),
        );

        let api = registry.breaker("exchange_api");
        api.record_failure(&Error::timeout("slow"));
        api.record_failure(&Error::timeout("slow"));

        assert_eq!(api.state(), CircuitState::Open);
        assert_eq!(registry.breaker("websocket").state(), CircuitState::Closed);
        assert_eq!(registry.breaker("cache").state(), CircuitState::Closed);
    }

    #[test]
    fn test_separate_registries_do_not_share_state() {
        let first = Registry::default();
        let second = Registry::default();
        first.breaker("api").record_failure(&Error::io("boom"));

        assert_eq!(first.breaker("api").consecutive_failures(), 1);
        assert_eq!(second.breaker("api").consecutive_failures(), 0);
    }

    #[test]
    fn test_config_overrides_per_name() {
        let mut config = GuardConfig::default();
        config.breakers.insert(
            "exchange_api".to_string(),
            BreakerConfig {
                failure_threshold: 1,
                open_timeout_ms: 5_000,
            },
        );
        let registry = Registry::from_config(&config);

        let api = registry.breaker("exchange_api");
        assert_eq!(api.config().failure_threshold, 1);
        assert_eq!(api.config().open_timeout, Duration::from_secs(5));

        let ws = registry.breaker("websocket");
        assert_eq!(ws.config().failure_threshold, 5);
        assert_eq!(ws.config().open_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_retry_manager_shares_breaker() {
        let registry = Registry::default();
        let manager = registry.retry_manager("exchange_api");
        let breaker = manager.breaker().unwrap();
        assert!(Arc::ptr_eq(breaker, &registry.breaker("exchange_api")));
        assert_eq!(manager.policy(), registry.default_policy());
    }

    #[test]
    fn test_stats_and_reset_all() {
        let registry = Registry::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_timeout: Duration::from_secs(60),
            },
            RetryPolicy::default(),
        );
        registry.breaker("b").record_failure(&Error::io("x"));
        registry.breaker("a");

        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "a");
        assert_eq!(stats[1].state, CircuitState::Open);

        assert!(!registry.reset("missing"));
        registry.reset_all();
        assert_eq!(registry.breaker("b").state(), CircuitState::Closed);
    }
}
