//! Request handlers: the thing a transport delivers a packet into.
//!
//! An HTTP long-poll response can carry exactly one payload, so
//! [`Handler::deliver`] takes `self` by value. Once a handler has been used
//! it is gone, which makes "a bound handler is consumed by at most one
//! send" a property of the type system rather than a runtime check.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::TransportError;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one inbound request (not the logical session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A parked request that can receive one payload.
pub trait Handler: Send + 'static {
    /// Writes `payload` as the response. Consumes the handler.
    ///
    /// # Errors
    /// `DeliveryToClosedConnection` if the client is no longer listening.
    fn deliver(self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Whether the other side already went away.
    fn is_closed(&self) -> bool;

    fn id(&self) -> ConnectionId;
}

// ---------------------------------------------------------------------------
// Long-poll handler
// ---------------------------------------------------------------------------

/// The transport-side half of a parked long-poll request.
#[derive(Debug)]
pub struct PollResponder {
    id: ConnectionId,
    tx: oneshot::Sender<Vec<u8>>,
}

/// The HTTP-side half: resolves when a packet is delivered.
#[derive(Debug)]
pub struct PendingPoll {
    id: ConnectionId,
    rx: oneshot::Receiver<Vec<u8>>,
}

/// Creates a connected responder/pending pair for one events request.
pub fn long_poll() -> (PollResponder, PendingPoll) {
    let id = ConnectionId::next();
    let (tx, rx) = oneshot::channel();
    (PollResponder { id, tx }, PendingPoll { id, rx })
}

impl Handler for PollResponder {
    fn deliver(self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(payload)
            .map_err(|_| TransportError::DeliveryToClosedConnection(self.id))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

impl PendingPoll {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Waits for a payload.
    ///
    /// Returns `None` if the responder was dropped without delivering
    /// (replaced by a newer request, or the transport shut down).
    pub async fn wait(self) -> Option<Vec<u8>> {
        self.rx.await.ok()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Option<Vec<u8>> {
        tokio::time::timeout(timeout, self.rx).await.ok()?.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_deliver_reaches_pending_poll() {
        let (responder, pending) = long_poll();
        assert_eq!(responder.id(), pending.id());
        responder.deliver(b"hi".to_vec()).unwrap();
        assert_eq!(pending.wait().await, Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn test_deliver_after_client_left_fails() {
        let (responder, pending) = long_poll();
        drop(pending);
        assert!(responder.is_closed());
        assert!(matches!(
            responder.deliver(b"hi".to_vec()),
            Err(TransportError::DeliveryToClosedConnection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_returns_none() {
        let (_responder, pending) = long_poll();
        assert_eq!(pending.wait_timeout(Duration::from_secs(30)).await, None);
    }
}
