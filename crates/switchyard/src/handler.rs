//! Per-connection handler: admission, welcome, read loop, writer task.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Complete the WebSocket handshake
//!   2. Admit through the registry → close with 1013/1008 if refused
//!   3. Spawn the writer and dispatch tasks, queue the `connected` frame
//!   4. Loop: receive frames → rate-check → hand to the dispatch task
//!
//! The read loop never waits on a handler, so pongs keep arriving while
//! a slow handler runs. The dispatch task handles frames one at a time in
//! arrival order.
//!
//! The connection leaves the registry when the read loop ends, whatever
//! the reason (drop guard).

use std::net::SocketAddr;
use std::sync::Arc;

use switchyard_protocol::OutboundFrame;
use switchyard_session::{ConnectionId, Outbound, SessionError};
use switchyard_transport::{
    CloseReason, Connection, Inbound, TransportError, Upgrade, WebSocketConnection,
    WebSocketUpgrade,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::SwitchyardError;
use crate::hub::Hub;

/// Frames read but not yet dispatched. When full, reading pauses.
const DISPATCH_QUEUE_SIZE: usize = 64;

/// Work handed from the read loop to the dispatch task.
enum Work {
    Frame(Vec<u8>),
    /// Answered with a `rate_limited` error, in order with the rest.
    RateLimited,
}

/// Removes the connection from the registry when the handler exits,
/// including on panic. Removal cancels the connection's token, which
/// stops its streams and its writer task.
struct RegistryGuard {
    conn_id: ConnectionId,
    hub: Arc<Hub>,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.hub.registry().remove(self.conn_id);
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    upgrade: WebSocketUpgrade,
    hub: Arc<Hub>,
) -> Result<(), SwitchyardError> {
    let remote_addr = upgrade.remote_addr();
    let conn = upgrade.complete().await?;

    // --- Step 1: Admission ---
    let admitted = match hub.registry().admit(remote_addr) {
        Ok(admitted) => admitted,
        Err(e) => {
            let _ = conn.close(refusal_reason(&e)).await;
            return Err(e.into());
        }
    };
    let handle = admitted.handle;
    let conn_id = handle.id();
    let _guard = RegistryGuard {
        conn_id,
        hub: Arc::clone(&hub),
    };

    let conn = Arc::new(conn);
    tokio::spawn(write_loop(
        Arc::clone(&conn),
        admitted.outbound,
        handle.cancel_token().clone(),
        conn_id,
    ));

    handle.send_frame(
        &OutboundFrame::new("connected")
            .with("connectionId", conn_id.to_string())
            .with("capabilities", hub.capabilities()),
    );

    let cancel = handle.cancel_token().clone();
    let (work_tx, work_rx) = mpsc::channel(DISPATCH_QUEUE_SIZE);
    tokio::spawn(dispatch_loop(Arc::clone(&hub), conn_id, work_rx));

    // --- Step 2: Read loop ---
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(%conn_id, "connection removed, ending read loop");
                break;
            }
            received = conn.recv() => received,
        };

        match received {
            Ok(Some(Inbound::Frame(data))) => {
                handle.record_activity();
                let work = if admit_message(&hub, remote_addr) {
                    Work::Frame(data)
                } else {
                    tracing::debug!(%conn_id, %remote_addr, "message rate limited");
                    Work::RateLimited
                };
                let queued = tokio::select! {
                    biased;
                    () = cancel.cancelled() => false,
                    sent = work_tx.send(work) => sent.is_ok(),
                };
                if !queued {
                    break;
                }
            }
            Ok(Some(Inbound::Pong | Inbound::Ping)) => handle.mark_alive(),
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed by peer");
                break;
            }
            Err(TransportError::MessageTooLarge { limit }) => {
                tracing::warn!(%conn_id, limit, "inbound message too large, closing");
                handle.close(CloseReason::TooLarge(format!("message exceeds {limit} bytes")));
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        }
    }

    // _guard drops here → registry removal fires.
    Ok(())
}

/// Dispatches queued frames one at a time, in arrival order.
///
/// Ends once the read loop drops its sender and the queue is empty, so
/// frames read before a peer close (a last `publish`, say) still run.
async fn dispatch_loop(hub: Arc<Hub>, conn_id: ConnectionId, mut work: mpsc::Receiver<Work>) {
    while let Some(next) = work.recv().await {
        match next {
            Work::Frame(raw) => hub.dispatch(conn_id, &raw).await,
            Work::RateLimited => {
                hub.send(conn_id, &OutboundFrame::error("rate_limited", "Rate limit exceeded"));
            }
        }
    }
}

fn admit_message(hub: &Hub, remote_addr: SocketAddr) -> bool {
    !hub.config().rate_limit_messages || hub.limiter().check(remote_addr.ip())
}

fn refusal_reason(error: &SessionError) -> CloseReason {
    match error {
        SessionError::RateLimited(_) => CloseReason::PolicyViolation("rate limit exceeded".into()),
        SessionError::AtCapacity(_) => CloseReason::TryAgainLater("server at capacity".into()),
        SessionError::NotFound(_) => CloseReason::Normal("refused".into()),
    }
}

/// Drains the outbound queue into the socket.
///
/// Queued items win over cancellation, so a close queued just before
/// removal is still delivered with its own reason.
async fn write_loop(
    conn: Arc<WebSocketConnection>,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    conn_id: ConnectionId,
) {
    loop {
        tokio::select! {
            biased;
            item = outbound.recv() => {
                let Some(item) = item else { return };
                if !write(&conn, item, conn_id).await {
                    return;
                }
            }
            () = cancel.cancelled() => {
                while let Ok(item) = outbound.try_recv() {
                    if !write(&conn, item, conn_id).await {
                        return;
                    }
                }
                let _ = conn.close(CloseReason::GoingAway("connection removed".into())).await;
                return;
            }
        }
    }
}

/// Writes one item. Returns `false` once the writer should stop.
async fn write(conn: &WebSocketConnection, item: Outbound, conn_id: ConnectionId) -> bool {
    let result = match item {
        Outbound::Text(text) => conn.send_text(&text).await,
        Outbound::Ping => conn.ping().await,
        Outbound::Close(reason) => {
            tracing::debug!(%conn_id, %reason, "closing connection");
            let _ = conn.close(reason).await;
            return false;
        }
    };
    if let Err(e) = result {
        tracing::debug!(%conn_id, error = %e, "write failed");
        return false;
    }
    true
}
