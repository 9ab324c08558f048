//! Message routing: decode a client frame, run its handler, reply.
//!
//! Built-in types ([`BuiltinKind`]) are answered here against the hub's
//! registry and scheduler. Every other type is looked up in the table of
//! registered [`MessageHandler`]s.
//!
//! Nothing in this module closes a connection. Decode failures, unknown
//! types and handler errors all become `error` frames to the sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use switchyard_protocol::{BuiltinKind, Codec, JsonCodec, OutboundFrame};
use switchyard_session::ConnectionId;
use switchyard_stream::StreamDescriptor;
use tracing::{debug, warn};

use crate::hub::Hub;

/// Maximum time a registered handler may run before the request fails.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Handler interface
// ---------------------------------------------------------------------------

/// A handler for one application message type (e.g. `ai_request`).
///
/// Handlers run on the sender's dispatch task, so a slow handler delays
/// that connection's later messages but no one else's.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        connection_id: ConnectionId,
        data: Value,
    ) -> Result<HandlerReply, HandlerError>;
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(
        &self,
        connection_id: ConnectionId,
        data: Value,
    ) -> Result<HandlerReply, HandlerError> {
        (**self).handle(connection_id, data).await
    }
}

/// A handler's response: sent back to the requester as
/// `{type: kind, ...data}`.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerReply {
    pub kind: String,
    pub data: Value,
}

impl HandlerReply {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Why a handler could not answer. Sent to the client as an `error`
/// frame; the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The request's `data` is missing a field or has the wrong shape.
    #[error("{0}")]
    InvalidData(String),

    #[error("{0}")]
    NotFound(String),

    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Machine-readable code carried in the `error` frame.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidData(_) => "invalid_data",
            Self::NotFound(_) => "not_found",
            Self::Failed(_) => "handler_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// The table of registered handlers plus the dispatch logic.
#[derive(Default)]
pub(crate) struct Router {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl Router {
    /// Registers `handler` for `kind`. Returns `false` if `kind` is a
    /// built-in type.
    pub(crate) fn register(&self, kind: &str, handler: Arc<dyn MessageHandler>) -> bool {
        if BuiltinKind::from_tag(kind).is_some() {
            return false;
        }
        if self.handlers.write().insert(kind.to_owned(), handler).is_some() {
            warn!(kind, "replaced existing message handler");
        }
        true
    }

    /// Registered types, sorted.
    pub(crate) fn registered(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    fn handler(&self, kind: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().get(kind).cloned()
    }

    /// Handles one raw inbound frame from `conn`.
    pub(crate) async fn dispatch(&self, hub: &Hub, conn: ConnectionId, raw: &[u8]) {
        let frame = match JsonCodec.decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn_id = %conn, error = %e, "undecodable frame");
                let reply = OutboundFrame::error("invalid_frame", format!("Invalid message: {e}"))
                    .with_request_id(recover_request_id(raw));
                hub.send(conn, &reply);
                return;
            }
        };

        debug!(conn_id = %conn, kind = %frame.kind, "dispatching");
        let request_id = frame.request_id;

        let result = if let Some(kind) = BuiltinKind::from_tag(&frame.kind) {
            builtin(hub, conn, kind, frame.data, request_id.clone())
        } else if let Some(handler) = self.handler(&frame.kind) {
            run_handler(handler, conn, &frame.kind, frame.data).await
        } else {
            debug!(conn_id = %conn, kind = %frame.kind, "unknown message type");
            Ok(Some(OutboundFrame::error(
                "unknown_message_type",
                "Unknown message type",
            )))
        };

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => OutboundFrame::error(e.code(), e.to_string()),
        };
        hub.send(conn, &reply.with_request_id(request_id));
    }
}

async fn run_handler(
    handler: Arc<dyn MessageHandler>,
    conn: ConnectionId,
    kind: &str,
    data: Value,
) -> Result<Option<OutboundFrame>, HandlerError> {
    match tokio::time::timeout(HANDLER_TIMEOUT, handler.handle(conn, data)).await {
        Ok(Ok(reply)) => Ok(Some(OutboundFrame::from_value(reply.kind, reply.data))),
        Ok(Err(e)) => {
            debug!(conn_id = %conn, kind, error = %e, "handler failed");
            Err(e)
        }
        Err(_elapsed) => {
            warn!(conn_id = %conn, kind, "handler timed out after {:?}", HANDLER_TIMEOUT);
            Err(HandlerError::Failed(format!("Handler for '{kind}' timed out")))
        }
    }
}

/// Pulls `requestId` out of a frame that failed strict decoding.
fn recover_request_id(raw: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(raw).ok()?;
    value.get("requestId")?.as_str().map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// Answers a built-in type. `Ok(None)` means nothing more to send: either
/// a component already replied, or the connection is gone.
fn builtin(
    hub: &Hub,
    conn: ConnectionId,
    kind: BuiltinKind,
    data: Value,
    request_id: Option<String>,
) -> Result<Option<OutboundFrame>, HandlerError> {
    let reply = OutboundFrame::new(kind.reply_tag());
    match kind {
        BuiltinKind::Ping => Ok(Some(reply.with("data", data))),

        BuiltinKind::Subscribe => {
            let topics = parse_topics(&data)?;
            Ok(hub
                .registry()
                .subscribe(conn, &topics)
                .ok()
                .map(|current| reply.with("topics", current)))
        }

        BuiltinKind::Unsubscribe => {
            let topics = parse_topics(&data)?;
            Ok(hub
                .registry()
                .unsubscribe(conn, &topics)
                .ok()
                .map(|current| reply.with("topics", current)))
        }

        BuiltinKind::StreamRequest => {
            let stream_id = required_str(&data, "streamId")?;
            let operation = data
                .get("operation")
                .and_then(Value::as_str)
                .unwrap_or("default");
            let descriptor = StreamDescriptor::new(operation)
                .with_params(data.get("params").cloned().unwrap_or(Value::Null));

            match hub.streams().start(conn, stream_id, descriptor, request_id) {
                // The scheduler sent `stream_started` itself.
                Ok(outcome) if outcome.created => Ok(None),
                Ok(outcome) => Ok(Some(
                    reply
                        .with("streamId", outcome.task.id)
                        .with("existing", true)
                        .with("state", outcome.task.state.to_string())
                        .with("messageCount", outcome.task.chunk_count),
                )),
                Err(e) => {
                    debug!(conn_id = %conn, error = %e, "stream not started");
                    Ok(None)
                }
            }
        }

        BuiltinKind::StopStream => {
            let stream_id = required_str(&data, "streamId")?;
            match hub.streams().stop(conn, stream_id, request_id) {
                Some(_) => Ok(None),
                None => Err(HandlerError::NotFound(format!(
                    "Stream '{stream_id}' is not active"
                ))),
            }
        }

        BuiltinKind::GetStatus => {
            let Some(info) = hub.registry().info(conn) else {
                return Ok(None);
            };
            Ok(Some(
                reply
                    .with("connectionId", conn.to_string())
                    .with("connectedAt", info.connected_at.to_rfc3339())
                    .with("lastActivity", info.last_activity.to_rfc3339())
                    .with("messageCount", info.message_count)
                    .with("subscriptions", info.subscriptions)
                    .with("streams", to_value(&hub.streams().list(conn)))
                    .with("stats", to_value(&hub.stats())),
            ))
        }

        BuiltinKind::GetConnections => {
            Ok(Some(reply.with("connections", to_value(&hub.connections()))))
        }

        BuiltinKind::Publish => {
            let topic = required_str(&data, "topic")?;
            let message = OutboundFrame::new("topic_message")
                .with("topic", topic)
                .with("data", data.get("data").cloned().unwrap_or(Value::Null))
                .with("from", conn.to_string());
            let delivered = hub.broadcast_to_topic(topic, &message);
            Ok(Some(reply.with("topic", topic).with("delivered", delivered)))
        }

        BuiltinKind::Broadcast => {
            let message = OutboundFrame::new("broadcast")
                .with("data", data)
                .with("from", conn.to_string());
            let delivered = hub.broadcast_filtered(&message, |handle| handle.id() != conn);
            Ok(Some(reply.with("delivered", delivered)))
        }
    }
}

/// Accepts `{"topics": [..]}`, `{"topic": ".."}`, a bare array, or a bare
/// string.
pub(crate) fn parse_topics(data: &Value) -> Result<Vec<String>, HandlerError> {
    let raw = match data {
        Value::Object(map) => map
            .get("topics")
            .or_else(|| map.get("topic"))
            .cloned()
            .unwrap_or(Value::Null),
        other => other.clone(),
    };

    let topics = match raw {
        Value::String(topic) => vec![topic],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(topic) => Ok(topic),
                other => Err(HandlerError::InvalidData(format!(
                    "topic names must be strings, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    let topics: Vec<String> = topics.into_iter().filter(|t| !t.trim().is_empty()).collect();
    if topics.is_empty() {
        return Err(HandlerError::InvalidData("No topics given".into()));
    }
    Ok(topics)
}

fn required_str<'a>(data: &'a Value, key: &str) -> Result<&'a str, HandlerError> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerError::InvalidData(format!("Missing '{key}'")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_topics_shapes() {
        assert_eq!(parse_topics(&json!({"topics": ["a", "b"]})).unwrap(), vec!["a", "b"]);
        assert_eq!(parse_topics(&json!({"topic": "news"})).unwrap(), vec!["news"]);
        assert_eq!(parse_topics(&json!(["x"])).unwrap(), vec!["x"]);
        assert_eq!(parse_topics(&json!("solo")).unwrap(), vec!["solo"]);
    }

    #[test]
    fn test_parse_topics_rejects_empty_and_non_strings() {
        assert!(matches!(parse_topics(&json!({})), Err(HandlerError::InvalidData(_))));
        assert!(matches!(parse_topics(&json!({"topics": [" "]})), Err(HandlerError::InvalidData(_))));
        assert!(matches!(parse_topics(&json!({"topics": [1]})), Err(HandlerError::InvalidData(_))));
        assert!(matches!(parse_topics(&Value::Null), Err(HandlerError::InvalidData(_))));
    }

    #[test]
    fn test_recover_request_id() {
        assert_eq!(recover_request_id(br#"{"requestId":"7"}"#), Some("7".into()));
        assert_eq!(recover_request_id(br#"{"type":1,"requestId":"8"}"#), Some("8".into()));
        assert_eq!(recover_request_id(b"not json"), None);
    }

    #[test]
    fn test_handler_error_codes() {
        assert_eq!(HandlerError::InvalidData("x".into()).code(), "invalid_data");
        assert_eq!(HandlerError::NotFound("x".into()).code(), "not_found");
        assert_eq!(HandlerError::Failed("x".into()).code(), "handler_error");
    }

    struct Noop;

    #[async_trait]
    impl MessageHandler for Noop {
        async fn handle(&self, _: ConnectionId, data: Value) -> Result<HandlerReply, HandlerError> {
            Ok(HandlerReply::new("noop", data))
        }
    }

    #[test]
    fn test_register_refuses_builtin_types() {
        let router = Router::default();
        assert!(!router.register("ping", Arc::new(Noop)));
        assert!(router.register("ai_request", Arc::new(Noop)));
        assert!(router.register("ai_request", Arc::new(Noop)));
        assert_eq!(router.registered(), vec!["ai_request"]);
    }
}
