//! WebSocket transport over tokio-tungstenite.
//!
//! Text and binary messages both become [`Frame::Data`]. Pings from the peer
//! are answered by tungstenite on the next read or flush.

use std::sync::Once;
use std::time::Duration;

use futures_util::future::{ready, BoxFuture};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{Connector, Frame, Transport};

/// Connects to a `ws://` or `wss://` endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::with_source(ErrorKind::InvalidRequest, format!("invalid url '{}'", url), e))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::invalid_request(format!(
                    "unsupported scheme '{}', expected ws or wss",
                    other
                )))
            }
        }

        if url.scheme() == "wss" {
            install_crypto_provider();
        }

        Ok(Self { url, connect_timeout })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Transport>> {
        Box::pin(open(self.url.to_string(), self.connect_timeout))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// rustls needs a process-wide provider before the first `wss` handshake.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means the application installed its own provider first.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

async fn open(url: String, connect_timeout: Duration) -> Result<Transport> {
    let (ws, response) = tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await??;
    tracing::debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

    let (write, read) = ws.split();

    let stream = read.filter_map(|message| {
        ready(match message {
            Ok(message) => frame_from_message(message).map(Ok),
            Err(err) => Some(Err(Error::from(err))),
        })
    });

    let sink = write
        .sink_map_err(Error::from)
        .with(|frame: Frame| ready(Ok::<_, Error>(message_from_frame(frame))));

    Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
}

fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Data(text.as_bytes().to_vec())),
        Message::Binary(data) => Some(Frame::Data(data.to_vec())),
        Message::Ping(data) => Some(Frame::Ping(data.to_vec())),
        Message::Pong(data) => Some(Frame::Pong(data.to_vec())),
        Message::Close(_) => Some(Frame::Close),
        // Raw frames only surface when reading with a custom config.
        Message::Frame(_) => None,
    }
}

fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Data(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        use tungstenite::Error as Ws;

        match err {
            Ws::Io(io) => Error::from(io),
            Ws::ConnectionClosed | Ws::AlreadyClosed => {
                Error::with_source(ErrorKind::ConnectionReset, "websocket closed", err)
            }
            Ws::Http(ref response) => {
                let status = response.status().as_u16();
                let kind = match status {
                    401 | 403 => ErrorKind::Auth,
                    400..=499 => ErrorKind::InvalidRequest,
                    _ => ErrorKind::Io,
                };
                Error::with_source(kind, format!("handshake rejected with HTTP {}", status), err)
            }
            Ws::Url(_) => Error::with_source(ErrorKind::InvalidRequest, "invalid websocket url", err),
            other => {
                let message = other.to_string();
                Error::with_source(ErrorKind::Protocol, message, other)
            }
        }
    }
}
