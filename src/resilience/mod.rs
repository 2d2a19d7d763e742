//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → registry.rs (look up the breaker + retry manager for its name)
//!     → retries.rs (admission check, attempt, classify, back off, retry)
//!     → circuit_breaker.rs (track failures, open circuit if threshold exceeded)
//!     → backoff.rs (delay between attempts / reconnects)
//! ```
//!
//! # Design Decisions
//! - Retries only for error kinds the caller marks retryable
//! - Circuit breaker prevents cascading failures; one per dependency
//! - Registry is injected, so tests get isolated breakers

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;

pub use backoff::{reconnect_delay, RetryPolicy};
pub use circuit_breaker::{BreakerStats, BreakerTransition, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use registry::Registry;
pub use retries::RetryManager;
