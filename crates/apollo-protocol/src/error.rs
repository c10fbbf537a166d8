//! Error types for the protocol layer.
//!
//! Every crate in Apollo has its own error enum. A `ProtocolError` always
//! means something went wrong turning packets or destinations into bytes
//! and strings (or back), never a networking or storage problem.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a packet into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a packet).
    ///
    /// Malformed JSON, a missing `__name__` key, or a field of the wrong
    /// type for a typed packet view all end up here.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The bytes decoded fine but name a packet kind nobody registered.
    ///
    /// Callers at the network edge treat this as "drop silently".
    #[error("unknown packet type: {0}")]
    UnknownPacketType(String),

    /// A routing key or destination string does not follow the
    /// `<class>.<scope>.<id>` grammar.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// The message is structurally valid JSON but not a packet
    /// (for example, a typed view serialized to something other than
    /// an object).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
