//! Explicit packet registry.
//!
//! The server fills a [`PacketRegistry`] at startup with one `register`
//! call per packet kind it understands. Decoding a packet looks its name up
//! here; anything not registered is refused with
//! [`ProtocolError::UnknownPacketType`].
//!
//! The registry is generic over the entry type so the protocol layer does
//! not need to know what "handling" a packet means. The server stores its
//! dispatch handlers as entries; tests can store plain markers.

use std::collections::BTreeMap;

use crate::{Codec, Packet, PacketKind, ProtocolError};

/// Maps packet names to entries of type `T`.
pub struct PacketRegistry<T> {
    entries: BTreeMap<String, T>,
}

impl<T> PacketRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers `entry` under the name of packet kind `K`.
    ///
    /// Returns the previous entry if the name was already registered.
    pub fn register<K: PacketKind>(&mut self, entry: T) -> Option<T> {
        self.register_name(K::NAME, entry)
    }

    /// Registers `entry` under an explicit name.
    pub fn register_name(&mut self, name: impl Into<String>, entry: T) -> Option<T> {
        self.entries.insert(name.into(), entry)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered packet names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes `data` and resolves the packet's entry.
    ///
    /// # Errors
    /// - `Decode` if the bytes are not a packet object.
    /// - `UnknownPacketType` if the name was never registered. No packet is
    ///   returned in that case.
    pub fn decode<C: Codec>(&self, codec: &C, data: &[u8]) -> Result<(Packet, &T), ProtocolError> {
        let packet: Packet = codec.decode(data)?;
        let entry = self
            .entries
            .get(packet.name())
            .ok_or_else(|| ProtocolError::UnknownPacketType(packet.name().to_owned()))?;
        Ok((packet, entry))
    }
}

impl<T> Default for PacketRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
