//! Transport abstraction for persistent streams.
//!
//! # Responsibilities
//! - Define the frame vocabulary the connection manager understands
//! - Split a live connection into an owned read half and a shareable write half
//! - Let the manager open connections without knowing the wire library
//!
//! # Data Flow
//! ```text
//! Connector::connect() → Transport { sink, stream }
//!     stream → receive loop (data + control frames)
//!     sink   → heartbeat / idle loops (pings), teardown (close)
//! ```

pub mod websocket;

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream};

use crate::error::{Error, Result};

pub use websocket::WebSocketConnector;

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application payload, delivered to the consumer.
    Data(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Read half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Write half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// One live connection. Replaced, never reused, across reconnects.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports to one endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection. Errors must already be classified.
    fn connect(&self) -> BoxFuture<'static, Result<Transport>>;

    /// Human-readable endpoint, used in logs.
    fn describe(&self) -> String;
}
