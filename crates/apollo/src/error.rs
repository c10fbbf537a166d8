//! Error types for the server crate.

use apollo_bus::BusError;
use apollo_protocol::{Packet, ProtocolError, SessionToken};
use apollo_session::{SessionError, StoreError};
use apollo_transport::TransportError;

use crate::packets::{ErrorPacket, IntoPacket, Severity};

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attributes let `?` convert sub-crate errors, so server
/// code deals with this single type.
#[derive(Debug, thiserror::Error)]
pub enum ApolloError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a packet could not be dispatched.
///
/// The first four are the caller's fault and have a reply packet; the rest
/// are infrastructure failures that are only logged.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("session {0} does not exist")]
    SessionNotFound(SessionToken),

    #[error("not authenticated")]
    UnauthenticatedAccess,

    /// Missing permission, or vetoed by a hook. Carries the message shown
    /// to the client.
    #[error("unauthorized: {0}")]
    UnauthorizedAction(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(#[source] ProtocolError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub(crate) const NOT_PERMITTED: &str = "Not permitted to perform action.";

impl DispatchError {
    /// The packet sent back to the triggering session, if any.
    pub fn reply_packet(&self) -> Option<Packet> {
        let (severity, msg) = match self {
            Self::UnauthenticatedAccess => (Severity::Error, "not authenticated".to_owned()),
            Self::UnauthorizedAction(msg) => (Severity::Warn, msg.clone()),
            Self::MalformedPacket(_) => (Severity::Error, "bad packet payload".to_owned()),
            _ => return None,
        };
        Some(ErrorPacket::new(severity, msg).into_packet())
    }

    /// `true` for failures caused by the broker being unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Bus(BusError::BrokerUnavailable | BusError::NotReady)
        )
    }
}

impl From<SessionError> for DispatchError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(token) => Self::SessionNotFound(token),
            SessionError::Store(e) => Self::Store(e),
            other => Self::UnauthorizedAction(other.to_string()),
        }
    }
}
