//! Resilience layer for remote calls and long-lived streams.
//!
//! - Per-dependency circuit breakers and bounded exponential retries
//! - A supervised WebSocket stream with heartbeat, idle detection and reconnect
//! - An injectable registry so dependencies fail in isolation

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod stream;
pub mod transport;

pub use config::GuardConfig;
pub use error::{Error, ErrorKind, Result};
pub use resilience::{CircuitBreaker, CircuitState, Registry, RetryManager, RetryPolicy};
pub use stream::{StreamEvent, StreamHandle, StreamManager, StreamSettings};
pub use transport::{Connector, Frame, Transport, WebSocketConnector};
