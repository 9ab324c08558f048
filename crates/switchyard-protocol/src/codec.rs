//! Codec trait and the JSON implementation.
//!
//! A codec converts between Rust types and the text that travels on the
//! wire. The router only depends on the [`Codec`] trait, so the
//! serialization format can change without touching dispatch code.

use serde::{de::DeserializeOwned, Serialize};

use crate::{InboundFrame, ProtocolError};

/// A codec that can encode Rust types to text and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes raw bytes into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Decodes an inbound frame and checks its `type` tag is non-empty.
    fn decode_frame(&self, data: &[u8]) -> Result<InboundFrame, ProtocolError> {
        let frame: InboundFrame = self.decode(data)?;
        if frame.kind.trim().is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "frame type must not be empty".into(),
            ));
        }
        Ok(frame)
    }
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use switchyard_protocol::{Codec, JsonCodec, OutboundFrame};
///
/// let codec = JsonCodec;
/// let text = codec.encode(&OutboundFrame::new("pong")).unwrap();
/// assert!(text.starts_with(r#"{"type":"pong""#));
///
/// let frame = codec.decode_frame(br#"{"type":"ping","data":1}"#).unwrap();
/// assert_eq!(frame.kind, "ping");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        // `from_slice` also rejects invalid UTF-8.
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
