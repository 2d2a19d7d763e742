//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → env.rs (STREAM_GUARD_* overrides)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → Registry / StreamSettings built from it at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use env::apply_env_overrides;
pub use loader::{load_config, load_from_env, parse_config, ConfigError};
pub use schema::{BreakerConfig, GuardConfig, LogFormat, ObservabilityConfig, RetryConfig, StreamConfig};
pub use validation::{validate_config, ValidationError};
