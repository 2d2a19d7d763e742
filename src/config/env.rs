//! Environment variable overrides.
//!
//! Every tunable has a `STREAM_GUARD_*` variable. Values are parsed with
//! `FromStr`; a value that does not parse is reported with its key instead
//! of being silently ignored.

use std::str::FromStr;

use crate::config::loader::ConfigError;
use crate::config::schema::GuardConfig;

/// Prefix shared by all override variables.
pub const ENV_PREFIX: &str = "STREAM_GUARD_";

/// Apply overrides from the process environment.
pub fn apply_process_env(config: &mut GuardConfig) -> Result<(), ConfigError> {
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides using `lookup` to resolve full variable names.
pub fn apply_env_overrides<F>(config: &mut GuardConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Overrides { lookup };

    env.set("FAILURE_THRESHOLD", &mut config.circuit_breaker.failure_threshold)?;
    env.set("OPEN_TIMEOUT_MS", &mut config.circuit_breaker.open_timeout_ms)?;

    env.set("MAX_ATTEMPTS", &mut config.retry.max_attempts)?;
    env.set("INITIAL_DELAY_MS", &mut config.retry.initial_delay_ms)?;
    env.set("MAX_DELAY_MS", &mut config.retry.max_delay_ms)?;
    env.set("EXPONENTIAL_BASE", &mut config.retry.exponential_base)?;

    let stream = &mut config.stream;
    env.set("STREAM_NAME", &mut stream.name)?;
    env.set("HEARTBEAT_INTERVAL_MS", &mut stream.heartbeat_interval_ms)?;
    env.set("HEARTBEAT_TIMEOUT_MS", &mut stream.heartbeat_timeout_ms)?;
    env.set("IDLE_TIMEOUT_MS", &mut stream.idle_timeout_ms)?;
    env.set("IDLE_GRACE_MS", &mut stream.idle_grace_ms)?;
    env.set("MAX_RECONNECT_ATTEMPTS", &mut stream.max_reconnect_attempts)?;
    env.set("INITIAL_BACKOFF_MS", &mut stream.initial_backoff_ms)?;
    env.set("MAX_BACKOFF_MS", &mut stream.max_backoff_ms)?;
    env.set("CONNECT_TIMEOUT_MS", &mut stream.connect_timeout_ms)?;
    if let Some(url) = env.get("STREAM_URL") {
        stream.url = Some(url);
    }

    let observability = &mut config.observability;
    env.set("LOG_LEVEL", &mut observability.log_level)?;
    env.set("LOG_FORMAT", &mut observability.log_format)?;
    env.set("METRICS_ENABLED", &mut observability.metrics_enabled)?;
    env.set("METRICS_ADDRESS", &mut observability.metrics_address)?;

    Ok(())
}

struct Overrides<F> {
    lookup: F,
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, suffix))
    }

    fn set<T: FromStr>(&self, suffix: &str, slot: &mut T) -> Result<(), ConfigError> {
        let Some(raw) = self.get(suffix) else {
            return Ok(());
        };
        *slot = raw.trim().parse().map_err(|_| ConfigError::Env {
            key: format!("{}{}", ENV_PREFIX, suffix),
            value: raw.clone(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = GuardConfig::default();
        let env = lookup(&[
            ("STREAM_GUARD_FAILURE_THRESHOLD", "7"),
            ("STREAM_GUARD_OPEN_TIMEOUT_MS", "1500"),
            ("STREAM_GUARD_EXPONENTIAL_BASE", "1.5"),
            ("STREAM_GUARD_MAX_RECONNECT_ATTEMPTS", " 4 "),
            ("STREAM_GUARD_STREAM_URL", "ws://localhost:9001"),
            ("STREAM_GUARD_LOG_FORMAT", "json"),
            ("STREAM_GUARD_METRICS_ENABLED", "true"),
        ]);

        apply_env_overrides(&mut config, env).unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 7);
        assert_eq!(config.circuit_breaker.open_timeout_ms, 1500);
        assert_eq!(config.retry.exponential_base, 1.5);
        assert_eq!(config.stream.max_reconnect_attempts, 4);
        assert_eq!(config.stream.url.as_deref(), Some("ws://localhost:9001"));
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(config.observability.metrics_enabled);
        // untouched
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_unparsable_value_names_key() {
        let mut config = GuardConfig::default();
        let env = lookup(&[("STREAM_GUARD_HEARTBEAT_INTERVAL_MS", "soon")]);

        let err = apply_env_overrides(&mut config, env).unwrap_err();
        match err {
            ConfigError::Env { key, value } => {
                assert_eq!(key, "STREAM_GUARD_HEARTBEAT_INTERVAL_MS");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
