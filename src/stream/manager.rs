//! Connection supervisor.
//!
//! # Responsibilities
//! - Gate every connect through the stream's circuit breaker
//! - Connect through the retry manager, then run one session at a time
//! - Record session failures on the breaker and schedule reconnects
//! - Stop for good once the reconnect budget is spent
//!
//! # Data Flow
//! ```text
//! start() → supervisor task
//!     loop:
//!         breaker.can_execute()? ──no──→ CircuitOpen, wait out the breaker
//!         retry.run_admitted(connector.connect)
//!         session::run() until failure or shutdown
//!         attempts < max? → Reconnecting, sleep backoff : Failed (terminal)
//! ```
//!
//! # Design Decisions
//! - A breaker refusal does not spend a reconnect attempt; a failed connect does
//! - Control events wait for buffer space like data messages; a caller disconnect
//!   or a dropped receiver ends the wait

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{Error, ErrorKind, Result, DEFAULT_RETRYABLE};
use crate::observability::metrics;
use crate::resilience::backoff::{apply_jitter, reconnect_delay};
use crate::resilience::{CircuitBreaker, Registry, RetryManager};
use crate::stream::handle::StreamHandle;
use crate::stream::session::{self, SessionEnd};
use crate::stream::state::{ConnectionState, DisconnectReason, StreamEvent, StreamExit};
use crate::stream::stats::StreamTracker;
use crate::transport::{Connector, Transport};

/// Timing and budget knobs for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub idle_timeout: Duration,
    pub idle_grace: Duration,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_jitter_ratio: f64,
    pub event_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for StreamSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            idle_grace: Duration::from_millis(config.idle_grace_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_jitter_ratio: config.backoff_jitter_ratio,
            event_buffer: config.event_buffer.max(1),
        }
    }
}

/// Owns the lifecycle of one logical stream.
pub struct StreamManager {
    name: String,
    connector: Arc<dyn Connector>,
    settings: StreamSettings,
    breaker: Arc<CircuitBreaker>,
    retry: RetryManager,
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("name", &self.name)
            .field("endpoint", &self.connector.describe())
            .field("settings", &self.settings)
            .finish()
    }
}

impl StreamManager {
    /// A stream whose breaker and connect retries come from `registry` under `name`.
    pub fn new(
        name: impl Into<String>,
        connector: impl Connector,
        settings: StreamSettings,
        registry: &Registry,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: registry.breaker(&name),
            retry: registry.retry_manager(&name),
            connector: Arc::new(connector),
            settings,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Spawn the supervisor. Must be called from within a tokio runtime.
    ///
    /// Dropping the returned handle stops the stream.
    pub fn start(self) -> (StreamHandle, mpsc::Receiver<StreamEvent>) {
        let (events_tx, events_rx) = mpsc::channel(self.settings.event_buffer);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let tracker = Arc::new(StreamTracker::new(
            &self.name,
            self.settings.idle_timeout,
            self.settings.heartbeat_timeout,
        ));
        tracker.set_state(ConnectionState::Disconnected);

        tracing::info!(
            stream = %self.name,
            endpoint = %self.connector.describe(),
            max_reconnect_attempts = self.settings.max_reconnect_attempts,
            "Starting stream"
        );

        let handle = StreamHandle::new(tracker.clone(), self.breaker.clone(), stop_tx, exit_rx);
        let span = tracing::info_span!("stream", stream = %self.name);
        let supervisor = Supervisor {
            manager: self,
            tracker,
            events: events_tx,
        };
        tokio::spawn(
            async move {
                let exit = supervisor.run(stop_rx).await;
                exit_tx.send_replace(Some(exit));
            }
            .instrument(span),
        );

        (handle, events_rx)
    }
}

struct Supervisor {
    manager: StreamManager,
    tracker: Arc<StreamTracker>,
    events: mpsc::Sender<StreamEvent>,
}

impl Supervisor {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) -> StreamExit {
        let settings = &self.manager.settings;
        let breaker = &self.manager.breaker;

        loop {
            self.tracker.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                _ = shutdown.recv() => return self.stopped(),
                result = self.connect() => result,
            };

            match connected {
                Ok(transport) => {
                    let session_id = Uuid::new_v4();
                    self.tracker.mark_connected();
                    self.tracker.set_state(ConnectionState::Connected);
                    tracing::info!(session_id = %session_id, "Stream connected");
                    if !self.emit(StreamEvent::Connected { session_id }, &mut shutdown).await {
                        self.tracker.mark_disconnected(None);
                        return self.stopped();
                    }

                    let span = tracing::info_span!("session", session_id = %session_id);
                    let end = session::run(
                        transport,
                        self.tracker.clone(),
                        settings,
                        self.events.clone(),
                        &mut shutdown,
                    )
                    .instrument(span)
                    .await;

                    match end {
                        SessionEnd::Requested => {
                            self.tracker.mark_disconnected(None);
                            return self.stopped();
                        }
                        SessionEnd::Failed { reason, error } => {
                            tracing::warn!(
                                session_id = %session_id,
                                reason = %reason,
                                error = %error,
                                "Stream session failed"
                            );
                            breaker.record_failure(&error);
                            self.tracker.mark_disconnected(Some(&error));
                            let delivered = self.emit_error(&error, &mut shutdown).await
                                && self.emit(StreamEvent::Disconnected { reason }, &mut shutdown).await;
                            if !delivered {
                                return self.stopped();
                            }
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::CircuitOpen => {
                    let retry_in = breaker
                        .remaining_open_time()
                        .unwrap_or_default()
                        .max(settings.initial_backoff);
                    self.tracker.set_state(ConnectionState::CircuitOpen);
                    tracing::warn!(
                        retry_in_ms = retry_in.as_millis() as u64,
                        "Circuit breaker is OPEN, holding off connect"
                    );
                    if !self.emit(StreamEvent::CircuitOpen { retry_in }, &mut shutdown).await {
                        return self.stopped();
                    }

                    tokio::select! {
                        _ = shutdown.recv() => return self.stopped(),
                        _ = sleep(retry_in) => continue,
                    }
                }
                Err(err) => {
                    tracing::warn!(kind = %err.kind(), error = %err, "Stream connect failed");
                    self.tracker.record_error(&err);
                    if !self.emit_error(&err, &mut shutdown).await {
                        return self.stopped();
                    }
                }
            }

            let attempts = self.tracker.reconnect_attempts();
            if attempts >= settings.max_reconnect_attempts {
                return self.failed(attempts, &mut shutdown).await;
            }

            let attempt = self.tracker.next_reconnect_attempt();
            let delay = apply_jitter(
                reconnect_delay(attempt, settings.initial_backoff, settings.max_backoff),
                settings.backoff_jitter_ratio,
                settings.max_backoff,
            );
            self.tracker.set_state(ConnectionState::Reconnecting);
            metrics::record_reconnect(&self.manager.name);
            tracing::warn!(
                attempt,
                max_attempts = settings.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            if !self.emit(StreamEvent::Reconnecting { attempt, delay }, &mut shutdown).await {
                return self.stopped();
            }

            tokio::select! {
                _ = shutdown.recv() => return self.stopped(),
                _ = sleep(delay) => {}
            }
        }
    }

    /// One admission check, then the transport connect under the retry policy.
    async fn connect(&self) -> Result<Transport> {
        let breaker = &self.manager.breaker;
        if !breaker.can_execute() {
            return Err(Error::circuit_open(breaker.name()));
        }

        let connector = &self.manager.connector;
        tracing::debug!(endpoint = %connector.describe(), "Connecting");
        self.manager
            .retry
            .run_admitted("connect", DEFAULT_RETRYABLE, || connector.connect())
            .await
    }

    fn stopped(&self) -> StreamExit {
        self.tracker.set_state(ConnectionState::Disconnected);
        tracing::info!("Stream disconnected by caller");
        // Best effort: the caller may be waiting on `closed()` without reading events.
        let _ = self.events.try_send(StreamEvent::Disconnected {
            reason: DisconnectReason::Requested,
        });
        StreamExit::Disconnected
    }

    /// Terminal: an `Error` for the exhausted budget, then `Failed`.
    async fn failed(&self, attempts: u32, shutdown: &mut broadcast::Receiver<()>) -> StreamExit {
        let last_error = self
            .tracker
            .last_error()
            .unwrap_or_else(|| "unknown error".to_string());
        self.tracker.set_state(ConnectionState::Failed);
        tracing::error!(
            attempts,
            last_error = %last_error,
            "Max reconnect attempts reached, stream failed"
        );

        let exhausted = Error::reconnect_exhausted(&self.manager.name, attempts);
        if self.emit_error(&exhausted, shutdown).await {
            let event = StreamEvent::Failed {
                attempts,
                last_error: last_error.clone(),
            };
            self.emit(event, shutdown).await;
        }
        StreamExit::Failed { attempts, last_error }
    }

    /// Deliver a control event, waiting for buffer space.
    ///
    /// `false` if the caller stopped the stream or dropped the receiver first.
    async fn emit(&self, event: StreamEvent, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            sent = self.events.send(event) => match sent {
                Ok(()) => true,
                Err(_) => {
                    tracing::info!("Event receiver dropped, stopping stream");
                    false
                }
            },
            _ = shutdown.recv() => false,
        }
    }

    async fn emit_error(&self, error: &Error, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let event = StreamEvent::Error {
            kind: error.kind(),
            message: error.message().to_string(),
        };
        self.emit(event, shutdown).await
    }
}
