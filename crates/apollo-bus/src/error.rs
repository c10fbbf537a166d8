//! Error types for the bus layer.

use apollo_protocol::{ProtocolError, SessionToken};
use apollo_session::StoreError;

use crate::{DeliveryTag, LoginBinding};

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The broker's command channel is closed.
    #[error("broker unavailable")]
    BrokerUnavailable,

    /// The bus is connected but its topology is not declared yet.
    #[error("bus not ready")]
    NotReady,

    /// The configured broker URL names a scheme this build can't speak.
    #[error("unsupported broker scheme {0:?}")]
    UnsupportedBroker(String),

    /// The queue does not exist.
    #[error("queue {0} not found")]
    QueueNotFound(String),

    /// Ack or reject for a delivery the broker doesn't know (already
    /// settled, or its queue was deleted).
    #[error("unknown delivery {0}")]
    UnknownDelivery(DeliveryTag),

    /// A consumer was started for a token with no session record.
    #[error("session {0} does not exist")]
    SessionNotFound(SessionToken),

    /// The login binding sequence stopped at `stage`.
    #[error("login binding failed at {stage}: {source}")]
    Binding {
        stage: LoginBinding,
        #[source]
        source: Box<BusError>,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
