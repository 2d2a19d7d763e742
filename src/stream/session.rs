//! One live connection: receive, heartbeat and idle loops.
//!
//! # Responsibilities
//! - Deliver data frames to the consumer in receive order
//! - Ping on a fixed cadence and detect unanswered pings
//! - Probe and drop connections that stop delivering data
//! - Tear all three loops down before the transport is released
//!
//! # Data Flow
//! ```text
//! receive loop ─┐
//! heartbeat loop ┼─ first failure ─→ run() ─→ abort all, close sink ─→ SessionEnd
//! idle loop ────┘
//! shutdown ─────────────────────────↗
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::stream::manager::StreamSettings;
use crate::stream::state::{DisconnectReason, StreamEvent};
use crate::stream::stats::{HeartbeatAction, StreamTracker};
use crate::transport::{Frame, FrameSink, FrameStream, Transport};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type SharedSink = Arc<Mutex<FrameSink>>;

/// How a session ended.
#[derive(Debug)]
pub(crate) enum SessionEnd {
    /// Caller disconnect, dropped handle or dropped event receiver.
    Requested,
    Failed { reason: DisconnectReason, error: Error },
}

/// Reports sent by the loops to the session owner.
#[derive(Debug)]
enum Signal {
    Failed(DisconnectReason, Error),
    ConsumerGone,
}

/// Run one connected session until it fails or shutdown is signalled.
pub(crate) async fn run(
    transport: Transport,
    tracker: Arc<StreamTracker>,
    settings: &StreamSettings,
    events: mpsc::Sender<StreamEvent>,
    shutdown: &mut broadcast::Receiver<()>,
) -> SessionEnd {
    let Transport { sink, stream } = transport;
    let sink: SharedSink = Arc::new(Mutex::new(sink));
    // Each loop reports at most once.
    let (signal_tx, mut signal_rx) = mpsc::channel(3);

    let tasks: [JoinHandle<()>; 3] = [
        tokio::spawn(
            receive_loop(stream, tracker.clone(), events, signal_tx.clone()).in_current_span(),
        ),
        tokio::spawn(
            heartbeat_loop(
                sink.clone(),
                tracker.clone(),
                settings.heartbeat_interval,
                settings.heartbeat_timeout,
                signal_tx.clone(),
            )
            .in_current_span(),
        ),
        tokio::spawn(
            idle_loop(
                sink.clone(),
                tracker.clone(),
                settings.idle_timeout,
                settings.idle_grace,
                signal_tx,
            )
            .in_current_span(),
        ),
    ];

    let end = tokio::select! {
        _ = shutdown.recv() => SessionEnd::Requested,
        signal = signal_rx.recv() => match signal {
            Some(Signal::Failed(reason, error)) => SessionEnd::Failed { reason, error },
            Some(Signal::ConsumerGone) | None => {
                tracing::info!("Event receiver dropped, stopping stream");
                SessionEnd::Requested
            }
        },
    };

    // No loop from this session may outlive it.
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }

    let mut sink = sink.lock().await;
    let send_close = matches!(end, SessionEnd::Requested);
    match timeout(CLOSE_TIMEOUT, close_sink(&mut sink, send_close)).await {
        Ok(Err(e)) => tracing::debug!(error = %e, "Error while closing transport"),
        Err(_) => tracing::debug!("Timed out closing transport"),
        Ok(Ok(())) => {}
    }

    end
}

async fn receive_loop(
    mut stream: FrameStream,
    tracker: Arc<StreamTracker>,
    events: mpsc::Sender<StreamEvent>,
    signal: mpsc::Sender<Signal>,
) {
    loop {
        match stream.next().await {
            Some(Ok(Frame::Data(payload))) => {
                tracker.on_data();
                metrics::record_message(tracker.name());
                if events.send(StreamEvent::Message(payload)).await.is_err() {
                    let _ = signal.send(Signal::ConsumerGone).await;
                    return;
                }
            }
            Some(Ok(Frame::Pong(_))) => {
                tracing::trace!("Pong received");
                tracker.on_pong();
                metrics::record_heartbeat(tracker.name(), "pong");
            }
            Some(Ok(Frame::Ping(_))) => {
                tracing::trace!("Ping received");
            }
            Some(Ok(Frame::Close)) | None => {
                tracing::warn!("Remote closed the stream");
                let error = Error::connection_reset("remote closed the stream");
                let _ = signal.send(Signal::Failed(DisconnectReason::RemoteClosed, error)).await;
                return;
            }
            Some(Err(error)) => {
                tracing::warn!(kind = %error.kind(), error = %error, "Transport read failed");
                let _ = signal.send(Signal::Failed(DisconnectReason::Transport, error)).await;
                return;
            }
        }
    }
}

async fn heartbeat_loop(
    sink: SharedSink,
    tracker: Arc<StreamTracker>,
    interval: Duration,
    pong_timeout: Duration,
    signal: mpsc::Sender<Signal>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match tracker.heartbeat_check(Instant::now()) {
            // Re-pinging here would keep pushing the deadline out.
            HeartbeatAction::Wait => continue,
            HeartbeatAction::PongTimeout => {
                tracing::warn!(
                    timeout_ms = pong_timeout.as_millis() as u64,
                    "Heartbeat timed out waiting for pong"
                );
                metrics::record_heartbeat(tracker.name(), "timeout");
                let error = Error::timeout(format!("no pong within {:?}", pong_timeout));
                let _ = signal.send(Signal::Failed(DisconnectReason::HeartbeatTimeout, error)).await;
                return;
            }
            HeartbeatAction::SendPing => {
                tracker.on_ping_sent();
                metrics::record_heartbeat(tracker.name(), "ping");
                tracing::trace!("Sending heartbeat ping");

                if let Err((reason, error)) = send_ping(&sink, pong_timeout).await {
                    let _ = signal.send(Signal::Failed(reason, error)).await;
                    return;
                }
            }
        }
    }
}

async fn idle_loop(
    sink: SharedSink,
    tracker: Arc<StreamTracker>,
    idle_timeout: Duration,
    grace: Duration,
    signal: mpsc::Sender<Signal>,
) {
    let period = (idle_timeout / 2).max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !tracker.idle_expired(Instant::now()) {
            continue;
        }

        tracing::warn!(
            idle_timeout_ms = idle_timeout.as_millis() as u64,
            "No data within idle timeout, probing connection"
        );
        let probe_at = Instant::now();
        tracker.on_probe_sent();
        metrics::record_heartbeat(tracker.name(), "idle_probe");

        if let Err((reason, error)) = send_ping(&sink, grace).await {
            let _ = signal.send(Signal::Failed(reason, error)).await;
            return;
        }

        sleep(grace.saturating_sub(probe_at.elapsed())).await;

        if tracker.silent_since(probe_at) {
            tracing::warn!("Connection stale after idle probe, forcing reconnect");
            metrics::record_heartbeat(tracker.name(), "stale");
            let error = Error::timeout(format!(
                "no data for {:?} plus {:?} grace",
                idle_timeout, grace
            ));
            let _ = signal.send(Signal::Failed(DisconnectReason::IdleTimeout, error)).await;
            return;
        }
    }
}

async fn close_sink(sink: &mut FrameSink, send_close: bool) -> Result<()> {
    if send_close {
        sink.send(Frame::Close).await?;
    }
    sink.close().await
}

/// Write one ping, bounded by `deadline`.
async fn send_ping(sink: &SharedSink, deadline: Duration) -> std::result::Result<(), (DisconnectReason, Error)> {
    let sent: Result<Result<()>, _> = timeout(deadline, async {
        let mut sink = sink.lock().await;
        sink.send(Frame::Ping(Vec::new())).await
    })
    .await;

    match sent {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => {
            tracing::warn!(error = %error, "Failed to send ping");
            Err((DisconnectReason::Transport, error))
        }
        Err(_) => Err((
            DisconnectReason::HeartbeatTimeout,
            Error::timeout("ping write stalled"),
        )),
    }
}
