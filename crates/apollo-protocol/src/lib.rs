//! Wire protocol for Apollo.
//!
//! This crate defines what travels between clients, server processes and
//! the broker:
//!
//! - **Packets** ([`Packet`], [`Origin`], [`PacketKind`]): the envelope
//!   every message uses, plus typed views over it.
//! - **Registry** ([`PacketRegistry`]): the explicit table of packet kinds
//!   a server understands.
//! - **Codec** ([`Codec`], [`JsonCodec`]): packets to bytes and back.
//! - **Destinations** ([`Destination`], [`Channel`], [`Scope`]): the
//!   routing-key grammar shared by every process on the bus.
//! - **Identifiers** ([`UserId`], [`SessionToken`], ...).
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Bus (routing keys) → Session
//! ```

mod codec;
mod destination;
mod error;
mod ids;
mod packet;
mod registry;

pub use codec::{Codec, JsonCodec};
pub use destination::{Channel, Destination, Scope, inter_queue, private_queue};
pub use error::ProtocolError;
pub use ids::{GroupId, LocationId, RealmId, SessionToken, UserId};
pub use packet::{Origin, Packet, PacketKind};
pub use registry::PacketRegistry;
