//! stream-guard
//!
//! Keeps one WebSocket feed alive and reports on it.
//!
//! ```text
//!   config (TOML / STREAM_GUARD_*) ──▶ Registry ──▶ StreamManager ──▶ WebSocketConnector ──▶ upstream
//!                                                      │
//!                                 events + stats ◀─────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use stream_guard::config::{load_config, load_from_env};
use stream_guard::lifecycle::shutdown_signal;
use stream_guard::observability::{logging, metrics};
use stream_guard::{Registry, StreamEvent, StreamManager, StreamSettings, WebSocketConnector};

#[derive(Parser)]
#[command(name = "stream-guard")]
#[command(about = "Resilient WebSocket stream with circuit breaking and reconnect", long_about = None)]
struct Cli {
    /// TOML config file. Without it, defaults plus STREAM_GUARD_* variables are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream endpoint (ws:// or wss://); overrides `stream.url`.
    #[arg(short, long)]
    url: Option<String>,

    /// Seconds between stats snapshots in the log.
    #[arg(long, default_value_t = 30)]
    stats_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "stream-guard starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let url = cli
        .url
        .or_else(|| config.stream.url.clone())
        .ok_or("no stream url: pass --url or set stream.url")?;

    tracing::info!(
        stream = %config.stream.name,
        url = %url,
        failure_threshold = config.circuit_breaker.failure_threshold,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        "Configuration loaded"
    );

    let registry = Registry::from_config(&config);
    let connector = WebSocketConnector::new(&url, config.stream.connect_timeout())?;
    let manager = StreamManager::new(
        config.stream.name.clone(),
        connector,
        StreamSettings::from(&config.stream),
        &registry,
    );
    let (handle, mut events) = manager.start();

    let period = Duration::from_secs(cli.stats_interval_secs.max(1));
    let mut stats_ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Message(payload)) => {
                    tracing::debug!(bytes = payload.len(), "Message received");
                }
                Some(StreamEvent::Failed { attempts, last_error }) => {
                    tracing::error!(attempts, last_error = %last_error, "Stream failed");
                    break;
                }
                Some(event) => tracing::info!(event = ?event, "Stream event"),
                None => break,
            },
            _ = stats_ticker.tick() => {
                match serde_json::to_string(&handle.stats()) {
                    Ok(stats) => tracing::info!(stats = %stats, "Stream stats"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize stats"),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, disconnecting");
                handle.disconnect().await;
                break;
            }
        }
    }

    handle.closed().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
