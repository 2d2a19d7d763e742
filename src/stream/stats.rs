//! Per-stream health bookkeeping and its serializable snapshot.
//!
//! # Design Decisions
//! - Counters are atomics, read without locking
//! - Timestamps live under one short-held std mutex; no await while held
//! - All timestamps are tokio `Instant`s, so paused-clock tests see them move

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::Error;
use crate::observability::metrics;
use crate::resilience::BreakerStats;
use crate::stream::state::ConnectionState;

/// Snapshot returned by `StreamHandle::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub name: String,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub total_connections: u64,
    pub total_disconnections: u64,
    pub total_messages_received: u64,
    pub total_pings_sent: u64,
    pub total_pongs_received: u64,
    pub total_errors: u64,
    /// Uptime of all finished sessions plus the current one.
    pub cumulative_uptime_secs: f64,
    pub current_uptime_secs: Option<f64>,
    pub last_message_secs_ago: Option<f64>,
    pub last_ping_secs_ago: Option<f64>,
    pub last_pong_secs_ago: Option<f64>,
    pub awaiting_pong: bool,
    pub is_healthy: bool,
    pub last_error: Option<String>,
    pub circuit_breaker: BreakerStats,
}

/// What the heartbeat loop should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    SendPing,
    /// A ping is outstanding but still within its timeout.
    Wait,
    PongTimeout,
}

#[derive(Debug, Default)]
struct Health {
    state: Option<ConnectionState>,
    last_message_at: Option<Instant>,
    last_ping_at: Option<Instant>,
    last_pong_at: Option<Instant>,
    awaiting_pong: bool,
    connected_at: Option<Instant>,
    cumulative_uptime: Duration,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    reconnect_attempts: AtomicU32,
    total_connections: AtomicU64,
    total_disconnections: AtomicU64,
    total_messages_received: AtomicU64,
    total_pings_sent: AtomicU64,
    total_pongs_received: AtomicU64,
    total_errors: AtomicU64,
}

/// Mutable health state shared by the supervisor, the session loops and handles.
#[derive(Debug)]
pub(crate) struct StreamTracker {
    name: String,
    idle_timeout: Duration,
    heartbeat_timeout: Duration,
    health: Mutex<Health>,
    counters: Counters,
}

impl StreamTracker {
    pub(crate) fn new(name: &str, idle_timeout: Duration, heartbeat_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            idle_timeout,
            heartbeat_timeout,
            health: Mutex::new(Health::default()),
            counters: Counters::default(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lock().state.unwrap_or(ConnectionState::Disconnected)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.lock().state.replace(state);
        if previous != Some(state) {
            tracing::debug!(stream = %self.name, to = %state, "Stream state changed");
            metrics::record_stream_state(&self.name, state.code());
        }
    }

    /// Fresh session: every health timestamp starts at now.
    pub(crate) fn mark_connected(&self) {
        let now = Instant::now();
        {
            let mut health = self.lock();
            health.last_message_at = Some(now);
            health.last_ping_at = Some(now);
            health.last_pong_at = Some(now);
            health.awaiting_pong = false;
            health.connected_at = Some(now);
        }
        self.counters.reconnect_attempts.store(0, Ordering::Relaxed);
        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Session over. Folds its uptime into the running total.
    pub(crate) fn mark_disconnected(&self, error: Option<&Error>) {
        {
            let mut health = self.lock();
            if let Some(since) = health.connected_at.take() {
                health.cumulative_uptime += since.elapsed();
            }
            health.awaiting_pong = false;
        }
        self.counters.total_disconnections.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = error {
            self.record_error(error);
        }
    }

    pub(crate) fn record_error(&self, error: &Error) {
        self.lock().last_error = Some(error.to_string());
        self.counters.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub(crate) fn on_data(&self) {
        {
            let mut health = self.lock();
            health.last_message_at = Some(Instant::now());
            health.awaiting_pong = false;
        }
        self.counters.total_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_pong(&self) {
        {
            let mut health = self.lock();
            health.last_pong_at = Some(Instant::now());
            health.awaiting_pong = false;
        }
        self.counters.total_pongs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_ping_sent(&self) {
        {
            let mut health = self.lock();
            health.last_ping_at = Some(Instant::now());
            health.awaiting_pong = true;
        }
        self.counters.total_pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Idle probe ping. Counted, but leaves the heartbeat deadline alone.
    pub(crate) fn on_probe_sent(&self) {
        self.counters.total_pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn heartbeat_check(&self, now: Instant) -> HeartbeatAction {
        let health = self.lock();
        if !health.awaiting_pong {
            return HeartbeatAction::SendPing;
        }
        match health.last_ping_at {
            Some(at) if now.saturating_duration_since(at) >= self.heartbeat_timeout => {
                HeartbeatAction::PongTimeout
            }
            _ => HeartbeatAction::Wait,
        }
    }

    /// True once no data frame has arrived for `idle_timeout`.
    pub(crate) fn idle_expired(&self, now: Instant) -> bool {
        match self.lock().last_message_at {
            Some(at) => now.saturating_duration_since(at) >= self.idle_timeout,
            None => false,
        }
    }

    /// True when no data frame has arrived since `since`.
    pub(crate) fn silent_since(&self, since: Instant) -> bool {
        match self.lock().last_message_at {
            Some(at) => at < since,
            None => true,
        }
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.counters.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Bump and return the reconnect attempt counter.
    pub(crate) fn next_reconnect_attempt(&self) -> u32 {
        self.counters.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn is_healthy(&self) -> bool {
        let health = self.lock();
        health.state == Some(ConnectionState::Connected)
            && health
                .last_message_at
                .map_or(false, |at| at.elapsed() < self.idle_timeout)
    }

    pub(crate) fn snapshot(&self, circuit_breaker: BreakerStats) -> StreamStats {
        let is_healthy = self.is_healthy();
        let health = self.lock();
        let current_uptime = health.connected_at.map(|at| at.elapsed());
        let secs_ago = |at: Option<Instant>| at.map(|at| at.elapsed().as_secs_f64());

        StreamStats {
            name: self.name.clone(),
            state: health.state.unwrap_or(ConnectionState::Disconnected),
            reconnect_attempts: self.counters.reconnect_attempts.load(Ordering::Relaxed),
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            total_disconnections: self.counters.total_disconnections.load(Ordering::Relaxed),
            total_messages_received: self.counters.total_messages_received.load(Ordering::Relaxed),
            total_pings_sent: self.counters.total_pings_sent.load(Ordering::Relaxed),
            total_pongs_received: self.counters.total_pongs_received.load(Ordering::Relaxed),
            total_errors: self.counters.total_errors.load(Ordering::Relaxed),
            cumulative_uptime_secs: (health.cumulative_uptime + current_uptime.unwrap_or_default())
                .as_secs_f64(),
            current_uptime_secs: current_uptime.map(|d| d.as_secs_f64()),
            last_message_secs_ago: secs_ago(health.last_message_at),
            last_ping_secs_ago: secs_ago(health.last_ping_at),
            last_pong_secs_ago: secs_ago(health.last_pong_at),
            awaiting_pong: health.awaiting_pong,
            is_healthy,
            last_error: health.last_error.clone(),
            circuit_breaker,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
