//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, bases > 1, min <= max)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{BreakerConfig, GuardConfig};

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);
    let mut names: Vec<_> = config.breakers.keys().collect();
    names.sort();
    for name in names {
        check_breaker(&format!("breakers.{}", name), &config.breakers[name], &mut errors);
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if !(retry.exponential_base > 1.0) {
        errors.push(ValidationError::new("retry.exponential_base", "must be greater than 1"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.initial_delay_ms",
            "must not exceed retry.max_delay_ms",
        ));
    }
    check_ratio("retry.jitter_ratio", retry.jitter_ratio, &mut errors);

    let stream = &config.stream;
    for (field, value) in [
        ("stream.heartbeat_interval_ms", stream.heartbeat_interval_ms),
        ("stream.heartbeat_timeout_ms", stream.heartbeat_timeout_ms),
        ("stream.idle_timeout_ms", stream.idle_timeout_ms),
        ("stream.connect_timeout_ms", stream.connect_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if stream.initial_backoff_ms > stream.max_backoff_ms {
        errors.push(ValidationError::new(
            "stream.initial_backoff_ms",
            "must not exceed stream.max_backoff_ms",
        ));
    }
    if stream.event_buffer == 0 {
        errors.push(ValidationError::new("stream.event_buffer", "must be at least 1"));
    }
    if stream.name.trim().is_empty() {
        errors.push(ValidationError::new("stream.name", "must not be empty"));
    }
    check_ratio("stream.backoff_jitter_ratio", stream.backoff_jitter_ratio, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(prefix: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold", prefix),
            "must be at least 1",
        ));
    }
    if breaker.open_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.open_timeout_ms", prefix),
            "must be greater than 0",
        ));
    }
}

fn check_ratio(field: &str, value: f64, errors: &mut Vec<ValidationError>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(ValidationError::new(field, "must be within [0, 1]"));
    }
}
