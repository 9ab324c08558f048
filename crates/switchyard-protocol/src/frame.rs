//! Inbound and outbound frame shapes.
//!
//! Inbound: `{"type": string, "data": any, "requestId"?: string}`.
//!
//! Outbound: `{"type": string, ...payload, "requestId"?: string,
//! "timestamp": string}`. The payload fields are flattened into the top
//! level object, so a `pong` carrying `data` serializes as
//! `{"type":"pong","data":"x","timestamp":"..."}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// The message type tag used for dispatch.
    #[serde(rename = "type")]
    pub kind: String,

    /// Arbitrary handler input. Missing `data` decodes as `null`.
    #[serde(default)]
    pub data: Value,

    /// Correlation id echoed on the response.
    #[serde(
        rename = "requestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
}

/// A frame the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub payload: Map<String, Value>,

    #[serde(
        rename = "requestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,

    /// Serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
}

impl OutboundFrame {
    /// Creates an empty frame of the given type, stamped with the current
    /// time.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a frame from a handler result.
    ///
    /// Object payloads are flattened into the frame; any other value is
    /// carried under a `data` key.
    pub fn from_value(kind: impl Into<String>, value: Value) -> Self {
        let mut frame = Self::new(kind);
        match value {
            Value::Object(map) => frame.payload = map,
            Value::Null => {}
            other => {
                frame.payload.insert("data".into(), other);
            }
        }
        frame
    }

    /// Creates an `error` frame with a machine-readable `code`.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new("error")
            .with("error", Value::String(message.into()))
            .with("code", Value::String(code.into()))
    }

    /// Adds one payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_owned(), value.into());
        self
    }

    /// Stamps the correlation id (no-op for `None`).
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if request_id.is_some() {
            self.request_id = request_id;
        }
        self
    }

    /// Returns a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_frame_flattens_payload() {
        let frame = OutboundFrame::new("pong")
            .with("data", "x")
            .with_request_id(Some("1".into()));
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["type"], "pong");
        assert_eq!(value["data"], "x");
        assert_eq!(value["requestId"], "1");
        assert!(value["timestamp"].is_string());
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_outbound_frame_omits_missing_request_id() {
        let value =
            serde_json::to_value(OutboundFrame::new("status")).unwrap();
        assert!(value.get("requestId").is_none());
    }

    #[test]
    fn test_from_value_object_is_flattened() {
        let frame = OutboundFrame::from_value(
            "ai_response",
            json!({"answer": 42, "model": "echo"}),
        );
        assert_eq!(frame.get("answer"), Some(&json!(42)));
        assert_eq!(frame.get("model"), Some(&json!("echo")));
    }

    #[test]
    fn test_from_value_scalar_goes_under_data() {
        let frame = OutboundFrame::from_value("echo", json!("hi"));
        assert_eq!(frame.get("data"), Some(&json!("hi")));
    }

    #[test]
    fn test_from_value_null_leaves_payload_empty() {
        let frame = OutboundFrame::from_value("ack", Value::Null);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_error_frame_shape() {
        let value = serde_json::to_value(OutboundFrame::error(
            "unknown_message_type",
            "Unknown message type",
        ))
        .unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "Unknown message type");
        assert_eq!(value["code"], "unknown_message_type");
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let value = serde_json::to_value(OutboundFrame::new("x")).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "got {ts}");
    }
}
