use apollo_protocol::{ProtocolError, SessionToken};

use crate::ConnectionId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The parked request went away before the packet could be written.
    ///
    /// Not fatal: the caller keeps the packet (a consumer requeues it on
    /// the broker) and the next request picks it up.
    #[error("delivery to closed connection {0}")]
    DeliveryToClosedConnection(ConnectionId),

    /// The transport was shut down; nothing more will be delivered.
    #[error("transport {0} shut down")]
    Shutdown(SessionToken),

    /// The packet could not be serialized for the client.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
