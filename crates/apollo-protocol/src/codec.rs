//! Codec trait and the JSON implementation used on the wire.
//!
//! A codec converts between Rust values and raw bytes. The bus stores
//! packets as bytes and the HTTP surface hands bytes to browsers, so both
//! go through a [`Codec`]. Only JSON exists today: browsers speak it
//! natively and broker payloads stay readable in audit logs.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust values to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because codecs live inside long-running tasks
/// (the broker actor, consumers, the inter listener) that Tokio may move
/// between threads.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use apollo_protocol::{Codec, JsonCodec, Packet};
///
/// let codec = JsonCodec;
/// let packet = Packet::new("chat").with("msg", "hello");
///
/// let bytes = codec.encode(&packet).unwrap();
/// assert_eq!(bytes, br#"{"__name__":"chat","msg":"hello"}"#);
///
/// let decoded: Packet = codec.decode(&bytes).unwrap();
/// assert_eq!(packet, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
