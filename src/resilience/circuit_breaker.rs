//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: trial request allowed to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: checked on can_execute, once open_timeout has elapsed
//!                   since the last failure
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails (no threshold check)
//! ```
//!
//! # Design Decisions
//! - Per-dependency circuit breaker (not global), handed out by the registry
//! - All counters live behind one mutex so updates are atomic relative to each other
//! - Half-Open admits every caller until the trial resolves; strict single-trial
//!   admission is left to callers that need it
//! - Transitions are logged, counted and broadcast to subscribers

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::error::Error;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn code(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long the circuit stays open after the last failure.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: config.open_timeout(),
        }
    }
}

/// Emitted on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerTransition {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Point-in-time view of a breaker, for logging and telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub success_rate: f64,
    pub last_failure_secs_ago: Option<f64>,
    pub last_success_secs_ago: Option<f64>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    last_error: Option<String>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
}

/// A three-state circuit breaker guarding one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    transitions: broadcast::Sender<BreakerTransition>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(32);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                last_success_at: None,
                last_error: None,
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
            }),
            transitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Receive every future state transition of this breaker.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.transitions.subscribe()
    }

    /// Admission check. Always counts as a request.
    ///
    /// In Open, each call re-checks the timeout; the first caller past it moves
    /// the breaker to Half-Open and is admitted. Half-Open admits every caller.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        inner.total_requests += 1;

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let eligible = match inner.last_failure_at {
                    None => true,
                    Some(at) => at.elapsed() > self.config.open_timeout,
                };
                if eligible {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    metrics::record_breaker_rejection(&self.name);
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_success_at = Some(Instant::now());
        inner.total_successes += 1;

        if inner.state == CircuitState::HalfOpen {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self, error: &Error) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.total_failures += 1;
        inner.last_failure_at = Some(Instant::now());
        inner.last_error = Some(error.to_string());

        match inner.state {
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                self.transition(&mut inner, CircuitState::Open)
            }
            _ => {}
        }
    }

    /// Operator escape hatch: force Closed and clear the failure streak.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    /// Time until an Open breaker becomes eligible for a trial, if Open.
    pub fn remaining_open_time(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        Some(match inner.last_failure_at {
            Some(at) => self.config.open_timeout.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        })
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let success_rate = if inner.total_requests > 0 {
            inner.total_successes as f64 / inner.total_requests as f64 * 100.0
        } else {
            0.0
        };
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            success_rate,
            last_failure_secs_ago: inner.last_failure_at.map(|at| at.elapsed().as_secs_f64()),
            last_success_secs_ago: inner.last_success_at.map(|at| at.elapsed().as_secs_f64()),
            last_error: inner.last_error.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Counters stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        let error = inner.last_error.as_deref().unwrap_or("none");
        match to {
            CircuitState::Open => tracing::error!(
                breaker = %self.name,
                from = %from,
                failures = inner.consecutive_failures,
                threshold = self.config.failure_threshold,
                error = %error,
                "Circuit breaker OPEN"
            ),
            CircuitState::HalfOpen => tracing::info!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "Circuit breaker HALF_OPEN, admitting trial request"
            ),
            CircuitState::Closed => tracing::info!(
                breaker = %self.name,
                from = %from,
                "Circuit breaker CLOSED"
            ),
        }

        metrics::record_breaker_state(&self.name, to.code());
        metrics::record_breaker_transition(&self.name, to.as_str());

        // No subscribers is fine.
        let _ = self.transitions.send(BreakerTransition {
            breaker: self.name.clone(),
            from,
            to,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_timeout: Duration::from_secs(open_secs),
            },
        )
    }

    fn fail(b: &CircuitBreaker) {
        b.record_failure(&Error::timeout("upstream slow"));
    }

    #[test]
    fn test_success_resets_streak_below_threshold() {
        let b = breaker(5, 300);
        for _ in 0..4 {
            fail(&b);
        }
        assert_eq!(b.consecutive_failures(), 4);
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[test]
    fn test_threshold_opens_and_rejects() {
        let b = breaker(3, 300);
        for _ in 0..3 {
            assert!(b.can_execute());
            fail(&b);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute());
        assert!(!b.can_execute());

        let stats = b.stats();
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.total_failures, 3);
        assert_eq!(stats.last_error.as_deref(), Some("timeout: upstream slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_immediately() {
        let b = breaker(3, 10);
        for _ in 0..3 {
            fail(&b);
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(b.can_execute());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Half-open admits callers until the trial resolves.
        assert!(b.can_execute());

        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_is_strict() {
        let b = breaker(1, 10);
        fail(&b);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!b.can_execute());
        assert_eq!(b.remaining_open_time(), Some(Duration::ZERO));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(b.can_execute());
        assert_eq!(b.remaining_open_time(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_recovery() {
        let b = breaker(3, 10);
        let mut events = b.subscribe();

        for _ in 0..3 {
            fail(&b);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute());
        assert_eq!(b.remaining_open_time(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(b.can_execute());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);

        let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|t| (t.from, t.to))
            .collect();
        assert_eq!(
            seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_reset() {
        let b = breaker(1, 300);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);

        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
        assert!(b.can_execute());
    }

    #[test]
    fn test_success_rate() {
        let b = breaker(5, 300);
        assert_eq!(b.stats().success_rate, 0.0);
        for _ in 0..4 {
            b.can_execute();
        }
        b.record_success();
        b.record_success();
        b.record_success();
        assert_eq!(b.stats().success_rate, 75.0);
    }
}
