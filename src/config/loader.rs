//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::env::apply_process_env;
use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse, apply environment overrides and validate a TOML document.
pub fn parse_config(content: &str) -> Result<GuardConfig, ConfigError> {
    let mut config: GuardConfig = toml::from_str(content)?;
    apply_process_env(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Defaults plus environment overrides, validated.
pub fn load_from_env() -> Result<GuardConfig, ConfigError> {
    let mut config = GuardConfig::default();
    apply_process_env(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
