//! Shared utilities for stream integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;

use stream_guard::error::{Error, ErrorKind, Result};
use stream_guard::resilience::{CircuitBreakerConfig, Registry, RetryPolicy};
use stream_guard::stream::{StreamEvent, StreamSettings};
use stream_guard::transport::{Connector, Frame, Transport};

/// What the next `connect()` does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Accept,
    Fail(ErrorKind),
}

struct MockState {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    attempts: AtomicU32,
    servers: mpsc::UnboundedSender<MockServer>,
}

/// In-memory connector. Accepted sessions are handed to the test as [`MockServer`]s.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new(fallback: Outcome) -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        Self::scripted(Vec::new(), fallback)
    }

    /// Play `script` in order, then repeat `fallback`.
    pub fn scripted(
        script: Vec<Outcome>,
        fallback: Outcome,
    ) -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, servers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(MockState {
                script: Mutex::new(script.into()),
                fallback,
                attempts: AtomicU32::new(0),
                servers,
            }),
        };
        (connector, servers_rx)
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Transport>> {
        let state = self.state.clone();
        Box::pin(async move {
            state.attempts.fetch_add(1, Ordering::SeqCst);
            let outcome = state
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(state.fallback);

            match outcome {
                Outcome::Fail(kind) => Err(Error::new(kind, "scripted connect failure")),
                Outcome::Accept => {
                    let (transport, server) = pipe();
                    let _ = state.servers.send(server);
                    Ok(transport)
                }
            }
        })
    }

    fn describe(&self) -> String {
        "mock://feed".to_string()
    }
}

/// Server side of an in-memory transport.
pub struct MockServer {
    to_client: mpsc::UnboundedSender<Result<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MockServer {
    pub fn send_data(&self, payload: &str) {
        let _ = self.to_client.send(Ok(Frame::Data(payload.as_bytes().to_vec())));
    }

    pub fn send_pong(&self) {
        let _ = self.to_client.send(Ok(Frame::Pong(Vec::new())));
    }

    pub fn close(&self) {
        let _ = self.to_client.send(Ok(Frame::Close));
    }

    pub fn fail(&self, error: Error) {
        let _ = self.to_client.send(Err(error));
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Frames the client has written so far, without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Answer every ping with a pong. Consumes the server.
    pub fn auto_pong(self) -> JoinHandle<()> {
        self.respond_to_pings(|server| server.send_pong())
    }

    /// Run `respond` for every ping the client sends.
    pub fn respond_to_pings<F>(mut self, respond: F) -> JoinHandle<()>
    where
        F: Fn(&MockServer) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(frame) = self.from_client.recv().await {
                if matches!(frame, Frame::Ping(_)) {
                    respond(&self);
                }
            }
        })
    }
}

fn pipe() -> (Transport, MockServer) {
    let (to_client, to_client_rx) = mpsc::unbounded_channel::<Result<Frame>>();
    let (from_client_tx, from_client) = mpsc::unbounded_channel::<Frame>();

    let stream = futures_util::stream::unfold(to_client_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let sink = futures_util::sink::unfold(from_client_tx, |tx, frame: Frame| async move {
        match tx.send(frame) {
            Ok(()) => Ok(tx),
            Err(_) => Err(Error::connection_reset("mock server gone")),
        }
    });

    (
        Transport::new(Box::pin(sink), Box::pin(stream)),
        MockServer {
            to_client,
            from_client,
        },
    )
}

/// Settings with the documented defaults except a long idle timeout and small buffer.
pub fn settings() -> StreamSettings {
    StreamSettings {
        heartbeat_interval: Duration::from_secs(15),
        heartbeat_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(600),
        idle_grace: Duration::from_secs(5),
        max_reconnect_attempts: 3,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(60),
        backoff_jitter_ratio: 0.0,
        event_buffer: 64,
    }
}

/// Isolated registry whose connect step is tried once per reconnect.
pub fn registry(failure_threshold: u32) -> Registry {
    Registry::new(
        CircuitBreakerConfig {
            failure_threshold,
            open_timeout: Duration::from_secs(10),
        },
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
    )
}

/// Next event, failing the test if none arrives within an hour of (virtual) time.
pub async fn next_event(events: &mut mpsc::Receiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(3600), events.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("event channel closed")
}

/// Virtual time since `started` is `expected`, give or take timer granularity.
pub fn assert_elapsed(started: tokio::time::Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(5),
        "expected ~{:?}, got {:?}",
        expected,
        elapsed
    );
}

/// Serve WebSockets on an ephemeral port. `handler` gets the zero-based connection index.
pub async fn start_ws_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(usize, WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    let connections = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let handler = handler.clone();
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        if let Ok(ws) = tokio_tungstenite::accept_async(socket).await {
                            handler(index, ws).await;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
