//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.
//! Durations are stored as milliseconds and exposed as [`Duration`] accessors.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Breaker defaults applied to every dependency.
    pub circuit_breaker: BreakerConfig,

    /// Retry policy handed to retry managers.
    pub retry: RetryConfig,

    /// Streaming connection settings.
    pub stream: StreamConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Per-dependency breaker overrides, keyed by dependency name.
    pub breakers: HashMap<String, BreakerConfig>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long an open circuit refuses calls, in milliseconds.
    pub open_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 300_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub exponential_base: f64,

    /// Random extra delay as a fraction of the computed delay (0 disables).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter_ratio: 0.0,
        }
    }
}

/// Streaming connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Endpoint for the bundled binary (e.g., "ws://127.0.0.1:9000/feed").
    pub url: Option<String>,

    /// Logical stream name; also the key of its circuit breaker.
    pub name: String,

    /// Ping cadence in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// How long a ping may stay unanswered, in milliseconds.
    pub heartbeat_timeout_ms: u64,

    /// Data silence that triggers an idle probe, in milliseconds.
    pub idle_timeout_ms: u64,

    /// Grace window after an idle probe, in milliseconds.
    pub idle_grace_ms: u64,

    /// Reconnect attempts before the stream is declared failed.
    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds.
    pub initial_backoff_ms: u64,

    /// Reconnect delay cap in milliseconds.
    pub max_backoff_ms: u64,

    /// Random extra reconnect delay as a fraction of the computed delay.
    pub backoff_jitter_ratio: f64,

    /// Transport connect deadline in milliseconds.
    pub connect_timeout_ms: u64,

    /// Capacity of the event channel handed to the application.
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            name: "market_stream".to_string(),
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
            idle_grace_ms: 5_000,
            max_reconnect_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_jitter_ratio: 0.0,
            connect_timeout_ms: 30_000,
            event_buffer: 1024,
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty output for terminals, JSON for log shippers.
    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
