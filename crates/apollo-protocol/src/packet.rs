//! The packet envelope: a name, an open set of fields, and an origin tag.
//!
//! On the wire a packet is one JSON object. The reserved `__name__` key
//! carries the packet name; every other key is a field:
//!
//! ```json
//! {"__name__": "chat", "msg": "hello", "target": "alice"}
//! ```
//!
//! The envelope deliberately knows nothing about what fields a given packet
//! kind has. Typed views live behind [`PacketKind`], and a reader that asks
//! for a field the sender never set just gets `None`.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Where a packet entered the system.
///
/// Set by the receiving edge (the action endpoint, the inter listener),
/// never by the sender. It is not part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    /// Submitted by a client through the action endpoint.
    #[default]
    External,
    /// Received from another server process over an `inter` destination.
    Inter,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::Inter => write!(f, "inter"),
        }
    }
}

/// An addressable, serializable message envelope.
///
/// Equality compares the name and fields only; two packets that differ
/// just in origin are the same logical packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "__name__")]
    name: String,

    #[serde(flatten)]
    fields: Map<String, Value>,

    #[serde(skip)]
    origin: Origin,
}

impl Packet {
    /// Creates an empty packet of the given kind.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Map::new(),
            origin: Origin::default(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns the same packet tagged with `origin`.
    pub fn tagged(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// The routing discriminator.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Reads a field. Absent and explicit `null` both read as `None`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Reads a string field; anything that isn't a string reads as `None`.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.field(key).and_then(Value::as_u64)
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields
    }
}

impl Eq for Packet {}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, Value::Object(self.fields.clone()))
    }
}

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

/// A typed view over one packet kind.
///
/// Implementors are plain serde structs whose optional fields carry
/// `#[serde(default)]`, so a partial payload from an older or newer client
/// still converts. `NAME` is the value of the `__name__` key.
///
/// ```rust
/// use apollo_protocol::{Packet, PacketKind};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Chat {
///     #[serde(default)]
///     msg: String,
///     #[serde(default, skip_serializing_if = "Option::is_none")]
///     target: Option<String>,
/// }
///
/// impl PacketKind for Chat {
///     const NAME: &'static str = "chat";
/// }
///
/// let packet = Packet::new("chat").with("msg", "hi");
/// let chat = Chat::from_packet(&packet).unwrap();
/// assert_eq!(chat.msg, "hi");
/// assert!(chat.target.is_none());
/// ```
pub trait PacketKind: Serialize + DeserializeOwned {
    const NAME: &'static str;

    /// Converts the typed view into a generic envelope.
    fn to_packet(&self) -> Result<Packet, ProtocolError> {
        match serde_json::to_value(self).map_err(ProtocolError::Encode)? {
            Value::Object(fields) => Ok(Packet {
                name: Self::NAME.to_owned(),
                fields,
                origin: Origin::default(),
            }),
            other => Err(ProtocolError::InvalidMessage(format!(
                "packet {} serialized to non-object {other}",
                Self::NAME
            ))),
        }
    }

    /// Reads the typed view out of a generic envelope.
    ///
    /// # Errors
    /// `InvalidMessage` if the packet has a different name, `Decode` if a
    /// present field has the wrong type.
    fn from_packet(packet: &Packet) -> Result<Self, ProtocolError> {
        if packet.name != Self::NAME {
            return Err(ProtocolError::InvalidMessage(format!(
                "expected packet {}, got {}",
                Self::NAME,
                packet.name
            )));
        }
        serde_json::from_value(Value::Object(packet.fields.clone()))
            .map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Codec, JsonCodec};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Move {
        #[serde(default)]
        location: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    }

    impl PacketKind for Move {
        const NAME: &'static str = "move";
    }

    #[test]
    fn test_packet_wire_format_uses_name_key() {
        let packet = Packet::new("chat").with("msg", "hello");
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json, serde_json::json!({"__name__": "chat", "msg": "hello"}));
    }

    #[test]
    fn test_packet_absent_and_null_fields_read_as_none() {
        let packet: Packet =
            JsonCodec.decode(br#"{"__name__":"chat","target":null}"#).unwrap();
        assert_eq!(packet.field("target"), None);
        assert_eq!(packet.field("msg"), None);
        assert_eq!(packet.str_field("msg"), None);
    }

    #[test]
    fn test_packet_wrong_type_field_reads_as_none() {
        let packet = Packet::new("move").with("location", "north");
        assert_eq!(packet.u64_field("location"), None);
        assert_eq!(packet.str_field("location"), Some("north"));
    }

    #[test]
    fn test_origin_is_not_serialized_and_defaults_external() {
        let packet = Packet::new("logout").with("msg", "bye").tagged(Origin::Inter);
        let bytes = JsonCodec.encode(&packet).unwrap();
        assert!(!String::from_utf8(bytes.clone()).unwrap().contains("Inter"));

        let decoded: Packet = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.origin(), Origin::External);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_packet_kind_partial_payload_uses_defaults() {
        let packet = Packet::new("move");
        let view = Move::from_packet(&packet).unwrap();
        assert_eq!(view, Move { location: 0, reason: None });
    }

    #[test]
    fn test_packet_kind_unset_option_is_absent_on_wire() {
        let packet = Move { location: 3, reason: None }.to_packet().unwrap();
        assert_eq!(packet.name(), "move");
        assert_eq!(packet.u64_field("location"), Some(3));
        assert!(!packet.fields().contains_key("reason"));
    }

    #[test]
    fn test_packet_kind_rejects_other_name() {
        let packet = Packet::new("chat");
        assert!(matches!(
            Move::from_packet(&packet),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }
}
