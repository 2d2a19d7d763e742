//! Retry logic.
//!
//! # Responsibilities
//! - Consult the circuit breaker once before the first attempt
//! - Retry only errors whose kind is in the caller's retryable set
//! - Sleep with exponential backoff between attempts (suspends the caller only)
//! - Report every outcome to the breaker
//!
//! # Design Decisions
//! - Non-retryable errors fail immediately, after being recorded on the breaker
//! - Exhaustion propagates the last underlying error unchanged
//! - Concurrent `execute` calls are not serialized against each other

use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result, DEFAULT_RETRYABLE};
use crate::observability::metrics;
use crate::resilience::backoff::RetryPolicy;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Runs fallible operations under a retry policy and an optional breaker.
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: Arc<RetryPolicy>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        Self {
            policy: Arc::new(policy),
            breaker,
        }
    }

    /// A manager without admission control.
    pub fn without_breaker(policy: RetryPolicy) -> Self {
        Self::new(policy, None)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// [`execute`](Self::execute) with the default retryable kinds.
    pub async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute(operation, DEFAULT_RETRYABLE, op).await
    }

    /// Run `op` up to `policy.max_attempts` times.
    ///
    /// Fails with a `CircuitOpen` error, without invoking `op`, when the
    /// attached breaker refuses admission.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        retryable: &[ErrorKind],
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(breaker) = &self.breaker {
            if !breaker.can_execute() {
                tracing::warn!(
                    operation = %operation,
                    breaker = %breaker.name(),
                    "Circuit breaker is OPEN, refusing request"
                );
                metrics::record_retry_attempt(operation, "rejected");
                return Err(Error::circuit_open(breaker.name()));
            }
        }

        self.run_admitted(operation, retryable, op).await
    }

    /// Attempt loop for callers that already performed the admission check.
    pub(crate) async fn run_admitted<T, F, Fut>(
        &self,
        operation: &str,
        retryable: &[ErrorKind],
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success();
                    }
                    if attempt > 0 {
                        tracing::info!(
                            operation = %operation,
                            attempt = attempt + 1,
                            "Succeeded after retry"
                        );
                    }
                    metrics::record_retry_attempt(operation, "success");
                    return Ok(value);
                }
                Err(err) => {
                    if err.kind() != ErrorKind::CircuitOpen {
                        if let Some(breaker) = &self.breaker {
                            breaker.record_failure(&err);
                        }
                    }

                    if !err.is_retryable_in(retryable) {
                        tracing::warn!(
                            operation = %operation,
                            kind = %err.kind(),
                            error = %err,
                            "Non-retryable failure"
                        );
                        metrics::record_retry_attempt(operation, "fatal");
                        return Err(err);
                    }

                    if attempt + 1 >= max_attempts {
                        tracing::error!(
                            operation = %operation,
                            attempts = max_attempts,
                            error = %err,
                            "All attempts failed"
                        );
                        metrics::record_retry_attempt(operation, "exhausted");
                        return Err(err);
                    }

                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        operation = %operation,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    metrics::record_retry_attempt(operation, "retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
