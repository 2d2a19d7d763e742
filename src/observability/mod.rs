//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, retry managers and stream sessions produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every breaker transition and reconnect is both logged and counted
//! - Stream name / breaker name flow through as structured fields
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
