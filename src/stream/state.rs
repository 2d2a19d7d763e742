//! Stream state machine and the events it emits.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorKind;

/// Lifecycle state of one logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect budget exhausted. Terminal.
    Failed,
    /// Admission refused by the stream's breaker; waiting for it to cool down.
    CircuitOpen,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
            ConnectionState::CircuitOpen => "circuit_open",
        }
    }

    /// Gauge value exported to metrics.
    pub(crate) fn code(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::CircuitOpen => 4,
            ConnectionState::Failed => 5,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Caller asked for it. Not a failure.
    Requested,
    /// Peer sent a close frame or ended the stream.
    RemoteClosed,
    /// Read or write on the transport failed.
    Transport,
    /// A ping went unanswered past the heartbeat timeout.
    HeartbeatTimeout,
    /// No data arrived within the idle timeout plus grace window.
    IdleTimeout,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::RemoteClosed => "remote_closed",
            DisconnectReason::Transport => "transport",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::IdleTimeout => "idle_timeout",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a stream tells its consumer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected { session_id: Uuid },
    /// One data frame, in transport receive order.
    Message(Vec<u8>),
    Disconnected { reason: DisconnectReason },
    Error { kind: ErrorKind, message: String },
    Reconnecting { attempt: u32, delay: Duration },
    CircuitOpen { retry_in: Duration },
    /// Terminal. No further events follow.
    Failed { attempts: u32, last_error: String },
}

/// How the supervisor finished.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamExit {
    Disconnected,
    Failed { attempts: u32, last_error: String },
}
