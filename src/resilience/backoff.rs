//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Bounded exponential retry policy. Pure: no mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor, greater than 1.
    pub exponential_base: f64,
    /// Extra random delay as a fraction of the computed delay; 0 disables.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: config.exponential_base,
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`:
    /// `min(initial_delay * base^attempt, max_delay)`, plus jitter if enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max = self.max_delay.as_secs_f64();

        let base = if secs.is_finite() && secs < max {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_delay
        };
        apply_jitter(base, self.jitter_ratio, self.max_delay)
    }
}

/// Reconnect delay for the `attempt`-th reconnect (1-based):
/// `min(initial * 2^(attempt-1), max)`. Attempt 0 means no wait.
pub fn reconnect_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt - 1);
    initial.saturating_mul(factor).min(max)
}

/// Add up to `ratio * delay` of random extra delay, never exceeding `cap`.
pub fn apply_jitter(delay: Duration, ratio: f64, cap: Duration) -> Duration {
    if !(ratio > 0.0) {
        return delay;
    }

    let range_ms = (delay.as_millis() as f64 * ratio) as u64;
    let jitter = if range_ms > 0 {
        rand::thread_rng().gen_range(0..range_ms)
    } else {
        0
    };

    (delay + Duration::from_millis(jitter)).min(cap)
}
