//! # Switchyard
//!
//! Real-time multiplexed session manager over WebSocket.
//!
//! Each client holds one WebSocket connection over which it exchanges
//! typed JSON frames. On top of that connection Switchyard provides
//! request/response messages, topic publish/subscribe, server-driven
//! streams, per-address rate limiting and heartbeat liveness checks.
//! Application message types (e.g. `ai_request`) plug in through the
//! [`MessageHandler`](router::MessageHandler) trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchyard::prelude::*;
//!
//! # async fn run() -> Result<(), SwitchyardError> {
//! let server = SwitchyardServer::builder()
//!     .config(HubConfig::load("switchyard.json")?)
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod handler;
pub mod hub;
mod maintenance;
pub mod router;
mod server;

pub use error::SwitchyardError;
pub use server::{SwitchyardServer, SwitchyardServerBuilder};

pub use switchyard_protocol as protocol;
pub use switchyard_ratelimit as ratelimit;
pub use switchyard_session as session;
pub use switchyard_stream as stream;
pub use switchyard_transport as transport;

pub mod prelude {
    //! Everything needed to run a server and write handlers.

    pub use crate::SwitchyardError;
    pub use crate::config::{ConfigError, HubConfig};
    pub use crate::hub::{Hub, HubStats};
    pub use crate::router::{HandlerError, HandlerReply, MessageHandler};
    pub use crate::server::{SwitchyardServer, SwitchyardServerBuilder};

    pub use switchyard_protocol::{BuiltinKind, OutboundFrame};
    pub use switchyard_ratelimit::RateLimitConfig;
    pub use switchyard_session::{ConnectionId, ConnectionInfo};
    pub use switchyard_stream::{ChunkSource, StreamDescriptor, StreamState, StreamTask};
    pub use switchyard_transport::CloseReason;

    pub use async_trait::async_trait;
}
