//! Resilient persistent streams.
//!
//! # Data Flow
//! ```text
//! StreamManager::start()
//!     → manager.rs (supervisor: breaker gate, connect with retry, reconnect backoff)
//!     → session.rs (receive, heartbeat and idle loops per connection)
//!     → stats.rs (health timestamps and counters)
//!     → mpsc::Receiver<StreamEvent> (to the application)
//!
//! StreamHandle (handle.rs): state, health, stats, disconnect
//! ```
//!
//! # Design Decisions
//! - Events cross a channel; the stream never calls into application code
//! - One session at a time: the previous session's loops are gone before reconnecting
//! - Reconnect exhaustion is terminal and surfaced as `Failed`

pub mod handle;
pub mod manager;
pub(crate) mod session;
pub mod state;
pub mod stats;

pub use handle::StreamHandle;
pub use manager::{StreamManager, StreamSettings};
pub use state::{ConnectionState, DisconnectReason, StreamEvent};
pub use stats::StreamStats;
