//! Per-connection state shared between the connection's tasks.
//!
//! A [`ConnectionHandle`] is the server's record of one client. It is
//! shared (`Arc`) by:
//! - the connection's dispatch loop (activity counters, replies)
//! - its writer task (drains the outbound queue into the socket)
//! - stream tasks delivering chunks
//! - the heartbeat sweep (liveness flag only)
//!
//! Nothing here blocks: sends go through a bounded queue with
//! `try_send`, so a slow client only ever fills its own queue.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use switchyard_protocol::{Codec, JsonCodec, OutboundFrame};
use switchyard_transport::CloseReason;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// ConnectionId
// ---------------------------------------------------------------------------

/// Process-unique connection identifier, assigned by the registry.
///
/// Displays and serializes as the opaque string `conn-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Outbound queue items
// ---------------------------------------------------------------------------

/// One item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded frame. `Arc` so a broadcast encodes once.
    Text(Arc<str>),
    /// A transport-level ping.
    Ping,
    /// Close the socket; the writer stops after sending it.
    Close(CloseReason),
}

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// A live client connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    message_count: AtomicU64,
    /// Cleared before each heartbeat ping, set again by any sign of life.
    alive: AtomicBool,
    dropped: AtomicU64,
    outbound: mpsc::Sender<Outbound>,
    /// Cancelled when the connection is removed. Stream tasks hold child
    /// tokens, so removal stops every stream the connection owns.
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_addr,
            connected_at: now,
            last_activity: Mutex::new(now),
            message_count: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
            outbound,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Number of outbound items dropped because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Token cancelled when this connection leaves the registry.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `true` once the connection has been removed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Records an inbound frame: bumps the counter and activity time, and
    /// counts as proof of liveness.
    pub fn record_activity(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock() = Utc::now();
        self.mark_alive();
    }

    /// Marks the connection alive (pong or any inbound traffic).
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Clears the liveness flag, returning whether it was set.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Queues an encoded frame. Returns `false` if the connection is
    /// closed or its queue is full.
    pub fn send_text(&self, text: Arc<str>) -> bool {
        self.enqueue(Outbound::Text(text))
    }

    /// Encodes and queues a frame.
    pub fn send_frame(&self, frame: &OutboundFrame) -> bool {
        match JsonCodec.encode(frame) {
            Ok(text) => self.send_text(text.into()),
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "failed to encode frame");
                false
            }
        }
    }

    /// Encodes and queues a frame, waiting for queue space instead of
    /// dropping it. Returns `false` if the connection closes first.
    pub async fn deliver_frame(&self, frame: &OutboundFrame) -> bool {
        let text: Arc<str> = match JsonCodec.encode(frame) {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "failed to encode frame");
                return false;
            }
        };
        if self.is_closed() {
            return false;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.outbound.send(Outbound::Text(text)) => sent.is_ok(),
        }
    }

    /// Queues a transport-level ping.
    pub fn ping(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    /// Queues a close. The writer task flushes everything queued before it.
    pub fn close(&self, reason: CloseReason) -> bool {
        // Bypasses the closed check so a close can follow removal.
        self.outbound.try_send(Outbound::Close(reason)).is_ok()
    }

    fn enqueue(&self, item: Outbound) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.outbound.try_send(item).is_ok() {
            true
        } else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(conn_id = %self.id, dropped, "outbound queue full or closed");
            false
        }
    }

    /// Marks the connection closed. Idempotent.
    pub(crate) fn shut(&self) {
        self.cancel.cancel();
    }

    /// A serializable snapshot, combined with the topic set the registry
    /// keeps for this connection.
    pub fn info(&self, subscriptions: Vec<String>) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            remote_addr: self.remote_addr,
            connected_at: self.connected_at,
            last_activity: self.last_activity(),
            message_count: self.message_count(),
            alive: self.is_alive(),
            subscriptions,
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Read-only view of a connection, as returned by `get_connections`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub alive: bool,
    pub subscriptions: Vec<String>,
}
