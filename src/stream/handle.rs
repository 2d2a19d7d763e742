//! Caller-side control of a running stream.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::error::{Error, ErrorKind, Result};
use crate::resilience::CircuitBreaker;
use crate::stream::state::{ConnectionState, StreamExit};
use crate::stream::stats::{StreamStats, StreamTracker};

/// Handle returned by `StreamManager::start`.
///
/// Dropping it stops the stream: `stop` is the only sender, and the
/// supervisor treats a closed channel like an explicit stop.
#[derive(Debug)]
pub struct StreamHandle {
    tracker: Arc<StreamTracker>,
    breaker: Arc<CircuitBreaker>,
    stop: broadcast::Sender<()>,
    exit: watch::Receiver<Option<StreamExit>>,
}

impl StreamHandle {
    pub(crate) fn new(
        tracker: Arc<StreamTracker>,
        breaker: Arc<CircuitBreaker>,
        stop: broadcast::Sender<()>,
        exit: watch::Receiver<Option<StreamExit>>,
    ) -> Self {
        Self {
            tracker,
            breaker,
            stop,
            exit,
        }
    }

    pub fn name(&self) -> &str {
        self.tracker.name()
    }

    pub fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    /// Connected, and a data frame arrived within the idle timeout.
    pub fn is_healthy(&self) -> bool {
        self.tracker.is_healthy()
    }

    pub fn stats(&self) -> StreamStats {
        self.tracker.snapshot(self.breaker.stats())
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Stop the stream and wait until every loop has exited and the transport is closed.
    ///
    /// Not a failure: the breaker is left untouched.
    pub async fn disconnect(&self) {
        let _ = self.stop.send(());
        if let Err(e) = self.closed().await {
            tracing::debug!(stream = %self.name(), error = %e, "Stream had already stopped");
        }
    }

    /// Wait for the stream to stop.
    ///
    /// `Ok` after a caller disconnect; a `ReconnectExhausted` error once the
    /// stream has given up.
    pub async fn closed(&self) -> Result<()> {
        let mut exit = self.exit.clone();
        let outcome = match exit.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };

        match outcome {
            Some(StreamExit::Disconnected) => Ok(()),
            Some(StreamExit::Failed { attempts, last_error }) => {
                tracing::debug!(stream = %self.name(), last_error = %last_error, "Stream failed");
                Err(Error::reconnect_exhausted(self.name(), attempts))
            }
            None => Err(Error::new(
                ErrorKind::Other,
                format!("stream '{}' supervisor ended unexpectedly", self.name()),
            )),
        }
    }
}
