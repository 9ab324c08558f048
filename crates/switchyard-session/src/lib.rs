//! Connection session management for Switchyard.
//!
//! This crate owns everything the server knows about a live client:
//!
//! 1. **Identity and liveness** — [`ConnectionHandle`] (id, remote
//!    address, activity counters, liveness flag, outbound queue)
//! 2. **The registry** — [`ConnectionRegistry`] admits connections (after
//!    the rate limiter and capacity checks), removes them, and keeps the
//!    topic subscription indices consistent
//! 3. **Heartbeat** — [`HeartbeatMonitor`] sweeps the registry, pings
//!    live connections and evicts the ones that stopped answering
//!
//! # How it fits in the stack
//!
//! ```text
//! Router / Hub (above)  ← sends frames, subscribes, broadcasts
//!     ↕
//! Session Layer (this crate)  ← connection identity, topics, liveness
//!     ↕
//! Protocol + Transport (below)  ← frames, close codes
//! ```

mod connection;
mod error;
mod heartbeat;
mod registry;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionInfo, Outbound};
pub use error::SessionError;
pub use heartbeat::{HeartbeatMonitor, HeartbeatReport};
pub use registry::{Admitted, ConnectionRegistry, RegistryConfig};
