//! Error taxonomy shared by every resilience component.
//!
//! # Design Decisions
//! - Errors carry a closed [`ErrorKind`] tag; retry decisions look only at the tag
//! - Third-party errors are classified once, at the boundary (`From` impls)
//! - Exhausted retries surface the last underlying error, never a generic wrapper

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Boxed source error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification tag attached to every [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Operation did not finish before its deadline.
    Timeout,
    /// Remote actively refused the connection.
    ConnectionRefused,
    /// Established connection was reset or closed underneath us.
    ConnectionReset,
    /// Other transport-level I/O failure.
    Io,
    /// Peer violated the wire protocol.
    Protocol,
    /// Credentials rejected.
    Auth,
    /// Malformed request; retrying cannot help.
    InvalidRequest,
    /// Local admission control refused the call.
    CircuitOpen,
    /// A stream used up its reconnect budget.
    ReconnectExhausted,
    /// Anything else.
    Other,
}

/// Kinds retried when the caller does not supply its own set.
pub const DEFAULT_RETRYABLE: &[ErrorKind] = &[
    ErrorKind::Timeout,
    ErrorKind::ConnectionRefused,
    ErrorKind::ConnectionReset,
    ErrorKind::Io,
];

impl ErrorKind {
    /// Stable snake_case name, used for log fields and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::Io => "io",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Auth => "auth",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::ReconnectExhausted => "reconnect_exhausted",
            ErrorKind::Other => "other",
        }
    }

    /// True for the transient class (timeouts, resets, transport I/O).
    pub fn is_transient(self) -> bool {
        DEFAULT_RETRYABLE.contains(&self)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced (or classified) by the resilience layer.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

/// Result type for resilience operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionRefused, message)
    }

    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionReset, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Admission denied by the breaker guarding `dependency`.
    pub fn circuit_open(dependency: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker '{}' is open; refusing call", dependency),
        )
    }

    /// Terminal error for a stream that gave up reconnecting.
    pub fn reconnect_exhausted(stream: &str, attempts: u32) -> Self {
        Self::new(
            ErrorKind::ReconnectExhausted,
            format!("stream '{}' gave up after {} reconnect attempts", stream, attempts),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error's kind appears in `retryable`.
    pub fn is_retryable_in(&self, retryable: &[ErrorKind]) -> bool {
        retryable.contains(&self.kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match err.kind() {
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::ConnectionRefused => ErrorKind::ConnectionRefused,
            Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::BrokenPipe
            | Io::UnexpectedEof
            | Io::NotConnected => ErrorKind::ConnectionReset,
            Io::PermissionDenied => ErrorKind::Auth,
            Io::InvalidInput | Io::InvalidData => ErrorKind::InvalidRequest,
            _ => ErrorKind::Io,
        };
        let message = err.to_string();
        Self::with_source(kind, message, err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::with_source(ErrorKind::Timeout, "deadline elapsed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_io_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(Error::from(refused).kind(), ErrorKind::ConnectionRefused);

        let reset = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(Error::from(reset).kind(), ErrorKind::ConnectionReset);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(Error::from(timed_out).kind(), ErrorKind::Timeout);

        let other = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = Error::from(other);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_display() {
        let err = Error::circuit_open("exchange_api");
        assert_eq!(
            err.to_string(),
            "circuit_open: circuit breaker 'exchange_api' is open; refusing call"
        );

        let err = Error::reconnect_exhausted("market", 10);
        assert_eq!(err.kind(), ErrorKind::ReconnectExhausted);
        assert!(err.to_string().contains("10 reconnect attempts"));
    }

    #[test]
    fn test_default_retryable_set() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Io.is_transient());
        assert!(!ErrorKind::Auth.is_transient());
        assert!(!ErrorKind::CircuitOpen.is_transient());
        assert!(Error::protocol("bad frame").is_retryable_in(&[ErrorKind::Protocol]));
        assert!(!Error::protocol("bad frame").is_retryable_in(DEFAULT_RETRYABLE));
    }
}
