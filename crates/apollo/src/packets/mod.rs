//! The packet kinds the server understands and their handlers.
//!
//! Each module defines the typed view of one packet (a [`PacketKind`]) and
//! the [`PacketHandler`](crate::PacketHandler) that runs when a client or
//! another server sends it. [`register_defaults`] is the explicit table
//! tying the two together.

use apollo_protocol::{Packet, PacketKind};
use apollo_session::Store;

use crate::Dispatcher;

mod chat;
mod error;
mod info;
mod kick;
mod login;
mod logout;
mod movement;
mod online;

pub use chat::{Chat, ChatHandler};
pub use error::{ErrorPacket, Severity};
pub use info::{Info, InfoHandler};
pub use kick::{Kick, KickHandler};
pub use login::{Login, LoginHandler};
pub use logout::{Logout, LogoutHandler};
pub use movement::{Move, MoveHandler};
pub use online::{Online, OnlineHandler};

/// Registers every built-in packet kind.
///
/// `error` is server-to-client only and gets no handler.
pub fn register_defaults<S: Store>(dispatcher: &mut Dispatcher<S>) {
    dispatcher
        .register::<Login>(LoginHandler)
        .register::<Logout>(LogoutHandler)
        .register::<Move>(MoveHandler)
        .register::<Info>(InfoHandler)
        .register::<Chat>(ChatHandler)
        .register::<Kick>(KickHandler)
        .register::<Online>(OnlineHandler);
}

/// Converts a typed packet into an envelope.
///
/// Built-in kinds are plain structs, so serialization only fails on a
/// programming error; that is logged and an empty packet of the same name
/// is sent instead.
pub trait IntoPacket: PacketKind {
    fn into_packet(self) -> Packet
    where
        Self: Sized,
    {
        self.to_packet().unwrap_or_else(|e| {
            tracing::error!(packet = Self::NAME, error = %e, "packet serialization failed");
            Packet::new(Self::NAME)
        })
    }
}

impl<K: PacketKind> IntoPacket for K {}

/// Reads the typed view of a dispatched packet.
pub(crate) fn typed<K: PacketKind>(packet: &Packet) -> Result<K, crate::DispatchError> {
    K::from_packet(packet).map_err(crate::DispatchError::MalformedPacket)
}
