//! The session facade.
//!
//! [`Hub`] ties the rate limiter, connection registry, stream scheduler and
//! router together and is the only surface external collaborators (message
//! handlers, admin tooling, the server loop) talk to.
//!
//! Every operation on a connection id is infallible from the caller's
//! point of view: an id that is unknown or already gone yields `false`
//! or `0`, never an error.

use std::sync::Arc;

use serde::Serialize;
use switchyard_protocol::{BuiltinKind, Codec, JsonCodec, OutboundFrame};
use switchyard_ratelimit::RateLimiter;
use switchyard_session::{ConnectionHandle, ConnectionId, ConnectionInfo, ConnectionRegistry};
use switchyard_stream::{ChunkSource, DemoChunks, StreamScheduler};
use switchyard_transport::CloseReason;

use crate::SwitchyardError;
use crate::config::HubConfig;
use crate::router::{MessageHandler, Router};

/// Counters returned by [`Hub::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    /// Streams that have not finished yet.
    pub streams: usize,
    /// Addresses with requests inside the rate-limit windows.
    pub rate_limited_addresses: usize,
}

/// Shared server state. Cheap to share behind an `Arc`.
pub struct Hub {
    config: HubConfig,
    limiter: Arc<RateLimiter>,
    registry: Arc<ConnectionRegistry>,
    streams: StreamScheduler,
    router: Router,
}

impl Hub {
    /// Builds a hub whose streams produce [`DemoChunks`].
    pub fn new(config: HubConfig) -> Self {
        Self::with_chunk_source(config, Arc::new(DemoChunks))
    }

    pub fn with_chunk_source(config: HubConfig, source: Arc<dyn ChunkSource>) -> Self {
        let config = config.validated();
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let registry = Arc::new(ConnectionRegistry::new(
            config.registry_config(),
            Arc::clone(&limiter),
        ));
        let streams =
            StreamScheduler::with_source(Arc::clone(&registry), config.stream_config(), source);

        Self {
            config,
            limiter,
            registry,
            streams,
            router: Router::default(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn streams(&self) -> &StreamScheduler {
        &self.streams
    }

    // -----------------------------------------------------------------------
    // Handlers and dispatch
    // -----------------------------------------------------------------------

    /// Registers a handler for an application message type.
    ///
    /// # Errors
    /// [`SwitchyardError::ReservedType`] if `kind` is a built-in type.
    pub fn register_handler(
        &self,
        kind: &str,
        handler: impl MessageHandler + 'static,
    ) -> Result<(), SwitchyardError> {
        if !self.router.register(kind, Arc::new(handler)) {
            return Err(SwitchyardError::ReservedType(kind.to_owned()));
        }
        tracing::info!(kind, "message handler registered");
        Ok(())
    }

    /// Every message type this hub answers: built-ins first, then
    /// registered types in name order.
    pub fn capabilities(&self) -> Vec<String> {
        BuiltinKind::ALL
            .iter()
            .map(|kind| kind.as_str().to_owned())
            .chain(self.router.registered())
            .collect()
    }

    /// Decodes and handles one raw frame from `conn`. Any reply goes back
    /// to `conn` only.
    pub async fn dispatch(&self, conn: ConnectionId, raw: &[u8]) {
        self.router.dispatch(self, conn, raw).await;
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Sends a frame to one connection. `false` if it is gone or its queue
    /// is full.
    pub fn send(&self, conn: ConnectionId, frame: &OutboundFrame) -> bool {
        self.registry.send(conn, frame)
    }

    /// Sends a frame to every live connection. Returns how many accepted it.
    pub fn broadcast(&self, frame: &OutboundFrame) -> usize {
        self.broadcast_filtered(frame, |_| true)
    }

    /// Sends a frame to every live connection matching `predicate`.
    ///
    /// Targets are snapshotted first; the frame is encoded once.
    pub fn broadcast_filtered(
        &self,
        frame: &OutboundFrame,
        predicate: impl Fn(&ConnectionHandle) -> bool,
    ) -> usize {
        let targets: Vec<Arc<ConnectionHandle>> = self
            .registry
            .list_all()
            .into_iter()
            .filter(|handle| predicate(handle))
            .collect();
        deliver(&targets, frame)
    }

    /// Sends a frame to every subscriber of `topic`.
    pub fn broadcast_to_topic(&self, topic: &str, frame: &OutboundFrame) -> usize {
        deliver(&self.registry.subscribers(topic), frame)
    }

    // -----------------------------------------------------------------------
    // Inspection and teardown
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            streams: self.streams.active_count(),
            rate_limited_addresses: self.limiter.tracked_addresses(),
        }
    }

    /// Snapshot of every live connection, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.infos()
    }

    /// Closes and removes a connection. `false` if it was already gone.
    ///
    /// The close is queued before removal, so the writer flushes pending
    /// frames and then sends `reason`.
    pub fn disconnect(&self, conn: ConnectionId, reason: CloseReason) -> bool {
        let Some(handle) = self.registry.get(conn) else {
            return false;
        };
        handle.close(reason.clone());
        if self.registry.remove(conn).is_none() {
            return false;
        }
        tracing::info!(conn_id = %conn, %reason, "connection disconnected");
        true
    }

    /// Disconnects everyone with 1001 and cancels every stream.
    pub fn shutdown(&self) -> usize {
        let mut closed = 0;
        for handle in self.registry.list_all() {
            if self.disconnect(handle.id(), CloseReason::GoingAway("server shutting down".into())) {
                closed += 1;
            }
        }
        self.streams.stop_all();
        tracing::info!(closed, "hub shut down");
        closed
    }
}

fn deliver(targets: &[Arc<ConnectionHandle>], frame: &OutboundFrame) -> usize {
    if targets.is_empty() {
        return 0;
    }
    let text: Arc<str> = match JsonCodec.encode(frame) {
        Ok(text) => text.into(),
        Err(e) => {
            tracing::warn!(kind = %frame.kind, error = %e, "failed to encode broadcast frame");
            return 0;
        }
    };
    targets
        .iter()
        .filter(|handle| handle.send_text(Arc::clone(&text)))
        .count()
}
