//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary disconnects its stream, then exits
//! ```

pub mod signals;

pub use signals::shutdown_signal;
