//! Wire protocol for Switchyard.
//!
//! This crate defines the frames that clients and the server exchange:
//!
//! - **Frames** ([`InboundFrame`], [`OutboundFrame`]) — the JSON shapes
//!   that travel on the wire.
//! - **Kinds** ([`BuiltinKind`]) — the closed set of message types the
//!   server answers itself.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how frames are converted
//!   to and from text.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while decoding.
//!
//! ```text
//! Transport (bytes) → Protocol (frames) → Router (handlers)
//! ```

mod codec;
mod error;
mod frame;
mod kind;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use frame::{InboundFrame, OutboundFrame};
pub use kind::BuiltinKind;
