//! The transport: one logical client connection across many requests.
//!
//! A browser talks to the server through a series of short-lived HTTP
//! requests. The transport is the object that survives between them:
//!
//! ```text
//!              bind(h), queue empty
//!   Unbound ───────────────────────────→ Bound(h)
//!      ↑  ↑                                 │
//!      │  └──── send_event(p): h gets p ────┘
//!      │
//!      └── bind(h), queue non-empty: h gets the oldest queued packet
//!
//!   any state ── close() ──→ Closed
//! ```
//!
//! While unbound, packets pile up in a FIFO queue. Each bind flushes at
//! most one of them, because a handler can carry only one response; the
//! rest wait for the next request.

use std::collections::VecDeque;

use apollo_protocol::{Codec, JsonCodec, Packet, SessionToken};
use rand::Rng;
use tokio::sync::Mutex;

use crate::{CancelHandle, Handler, TransportError};

/// How many recently delivered broker message ids a transport remembers.
const RECENT_DELIVERIES: usize = 64;

/// Observable state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No request is parked.
    Unbound,
    /// A request is parked waiting for one packet.
    Bound,
    /// Shut down; binds and sends fail.
    Closed,
}

/// What [`Transport::bind`] did with the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// A queued packet was written to the handler; the transport is
    /// unbound again and no consumer is needed.
    Flushed,
    /// Nothing was queued; the handler is parked and the caller should
    /// start a consumer for it.
    Parked,
}

/// What [`Transport::send_event`] did with the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the bound handler.
    Delivered,
    /// No handler bound; appended to the outbound queue.
    Queued,
    /// The same broker message was already handed over once.
    Duplicate,
}

struct Inner<H> {
    handler: Option<H>,
    outbound: VecDeque<Packet>,
    consumer: Option<CancelHandle>,
    recent: VecDeque<u64>,
    closed: bool,
}

/// One logical connection, generic over the request handler type.
///
/// Shared as `Arc<Transport<H>>` between the session registry, the HTTP
/// handlers and the consumer task. All state sits behind one mutex that is
/// never held across an await.
pub struct Transport<H: Handler> {
    token: SessionToken,
    nonce: String,
    codec: JsonCodec,
    inner: Mutex<Inner<H>>,
}

impl<H: Handler> Transport<H> {
    /// Creates an unbound transport with a fresh random nonce.
    pub fn new(token: SessionToken) -> Self {
        Self::with_nonce(token, generate_nonce())
    }

    /// Creates an unbound transport with a known nonce.
    pub fn with_nonce(token: SessionToken, nonce: impl Into<String>) -> Self {
        Self {
            token,
            nonce: nonce.into(),
            codec: JsonCodec,
            inner: Mutex::new(Inner {
                handler: None,
                outbound: VecDeque::new(),
                consumer: None,
                recent: VecDeque::with_capacity(RECENT_DELIVERIES),
                closed: false,
            }),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// The per-transport nonce used in the login challenge.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub async fn state(&self) -> TransportState {
        let inner = self.inner.lock().await;
        if inner.closed {
            TransportState::Closed
        } else if inner.handler.is_some() {
            TransportState::Bound
        } else {
            TransportState::Unbound
        }
    }

    /// Number of packets waiting for a request.
    pub async fn queued(&self) -> usize {
        self.inner.lock().await.outbound.len()
    }

    /// Attaches a live request handler.
    ///
    /// If packets are queued, the oldest is written to `handler` right away
    /// and the transport stays unbound. Otherwise `handler` is parked,
    /// replacing (and thereby releasing) any handler parked earlier; the
    /// previous consumer is cancelled either way.
    ///
    /// # Errors
    /// - `Shutdown` if the transport is closed.
    /// - `DeliveryToClosedConnection` if flushing failed; the packet stays
    ///   at the head of the queue.
    pub async fn bind(&self, handler: H) -> Result<BindOutcome, TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(TransportError::Shutdown(self.token.clone()));
        }

        if let Some(stale) = inner.consumer.take() {
            stale.cancel();
        }

        if let Some(packet) = inner.outbound.front() {
            let payload = self.codec.encode(packet)?;
            let connection = handler.id();
            handler.deliver(payload)?;
            inner.outbound.pop_front();
            tracing::debug!(
                token = %self.token,
                %connection,
                remaining = inner.outbound.len(),
                "flushed queued packet on bind"
            );
            return Ok(BindOutcome::Flushed);
        }

        if let Some(previous) = inner.handler.replace(handler) {
            tracing::debug!(
                token = %self.token,
                connection = %previous.id(),
                "parked request replaced by a newer one"
            );
        }
        Ok(BindOutcome::Parked)
    }

    /// Sends a packet to the client.
    ///
    /// If a handler is bound it receives the packet and the transport
    /// becomes unbound; otherwise the packet is queued.
    ///
    /// # Errors
    /// - `Shutdown` if the transport is closed.
    /// - `DeliveryToClosedConnection` if the bound request went away. The
    ///   handler is discarded and the packet is not queued; the caller
    ///   decides whether to retry.
    pub async fn send_event(&self, packet: Packet) -> Result<SendOutcome, TransportError> {
        let mut inner = self.inner.lock().await;
        self.send_locked(&mut inner, packet)
    }

    /// Like [`send_event`](Self::send_event), but ignores a broker message
    /// that this transport already accepted.
    ///
    /// The id is only remembered once the packet was actually accepted, so
    /// a delivery that failed can be retried with the same id.
    pub async fn send_event_once(
        &self,
        message_id: u64,
        packet: Packet,
    ) -> Result<SendOutcome, TransportError> {
        let mut inner = self.inner.lock().await;
        if inner.recent.contains(&message_id) {
            tracing::debug!(token = %self.token, message_id, "duplicate delivery ignored");
            return Ok(SendOutcome::Duplicate);
        }
        let outcome = self.send_locked(&mut inner, packet)?;
        if inner.recent.len() == RECENT_DELIVERIES {
            inner.recent.pop_front();
        }
        inner.recent.push_back(message_id);
        Ok(outcome)
    }

    fn send_locked(&self, inner: &mut Inner<H>, packet: Packet) -> Result<SendOutcome, TransportError> {
        if inner.closed {
            return Err(TransportError::Shutdown(self.token.clone()));
        }
        match inner.handler.take() {
            Some(handler) => {
                let payload = self.codec.encode(&packet)?;
                handler.deliver(payload)?;
                Ok(SendOutcome::Delivered)
            }
            None => {
                inner.outbound.push_back(packet);
                Ok(SendOutcome::Queued)
            }
        }
    }

    /// Records the consumer currently feeding this transport.
    ///
    /// A consumer attached to a closed transport is cancelled at once.
    pub async fn attach_consumer(&self, consumer: CancelHandle) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            consumer.cancel();
            return;
        }
        if let Some(previous) = inner.consumer.replace(consumer) {
            previous.cancel();
        }
    }

    /// Shuts the transport down.
    ///
    /// Cancels the active consumer, writes `farewell` to the bound handler
    /// if there is one, and drops anything still queued. Returns `false`
    /// if the transport was already closed, in which case nothing happens.
    pub async fn close(&self, farewell: Option<Packet>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return false;
        }
        inner.closed = true;

        if let Some(consumer) = inner.consumer.take() {
            consumer.cancel();
        }

        let dropped = inner.outbound.len();
        inner.outbound.clear();

        if let (Some(handler), Some(packet)) = (inner.handler.take(), farewell) {
            let connection = handler.id();
            let written = self
                .codec
                .encode(&packet)
                .map_err(TransportError::from)
                .and_then(|payload| handler.deliver(payload));
            if let Err(e) = written {
                tracing::warn!(token = %self.token, %connection, error = %e, "farewell packet not delivered");
            }
        }

        tracing::debug!(token = %self.token, dropped, "transport closed");
        true
    }
}

/// Generates a 64-character hex nonce from 32 random bytes.
pub fn generate_nonce() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PendingPoll, PollResponder, cancel_pair, long_poll};

    fn transport() -> Transport<PollResponder> {
        Transport::new(SessionToken::from("t1"))
    }

    fn decode(bytes: Vec<u8>) -> Packet {
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn received(pending: PendingPoll) -> Packet {
        decode(pending.wait().await.expect("packet delivered"))
    }

    // -----------------------------------------------------------------------
    // bind / send_event
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_bind_then_send_delivers_exactly_once() {
        let t = transport();
        let (h, pending) = long_poll();

        assert_eq!(t.bind(h).await.unwrap(), BindOutcome::Parked);
        assert_eq!(t.state().await, TransportState::Bound);

        let p = Packet::new("chat").with("msg", "one");
        assert_eq!(t.send_event(p.clone()).await.unwrap(), SendOutcome::Delivered);
        assert_eq!(t.state().await, TransportState::Unbound);
        assert_eq!(received(pending).await, p);

        // The handler is gone: the next packet queues instead.
        let q = Packet::new("chat").with("msg", "two");
        assert_eq!(t.send_event(q).await.unwrap(), SendOutcome::Queued);
        assert_eq!(t.queued().await, 1);
    }

    #[tokio::test]
    async fn test_bind_flushes_one_packet_in_fifo_order() {
        let t = transport();
        let p1 = Packet::new("chat").with("n", 1);
        let p2 = Packet::new("chat").with("n", 2);
        t.send_event(p1.clone()).await.unwrap();
        t.send_event(p2.clone()).await.unwrap();

        let (h, pending) = long_poll();
        assert_eq!(t.bind(h).await.unwrap(), BindOutcome::Flushed);
        assert_eq!(received(pending).await, p1);
        assert_eq!(t.state().await, TransportState::Unbound);
        assert_eq!(t.queued().await, 1);

        let (h, pending) = long_poll();
        assert_eq!(t.bind(h).await.unwrap(), BindOutcome::Flushed);
        assert_eq!(received(pending).await, p2);
        assert_eq!(t.queued().await, 0);
    }

    #[tokio::test]
    async fn test_bind_replaces_parked_handler() {
        let t = transport();
        let (h1, pending1) = long_poll();
        let (h2, pending2) = long_poll();
        t.bind(h1).await.unwrap();
        t.bind(h2).await.unwrap();

        // The first request is released empty.
        assert_eq!(pending1.wait().await, None);

        let p = Packet::new("online");
        t.send_event(p.clone()).await.unwrap();
        assert_eq!(received(pending2).await, p);
    }

    #[tokio::test]
    async fn test_send_to_closed_request_fails_and_unbinds() {
        let t = transport();
        let (h, pending) = long_poll();
        t.bind(h).await.unwrap();
        drop(pending);

        let result = t.send_event(Packet::new("chat")).await;
        assert!(matches!(result, Err(TransportError::DeliveryToClosedConnection(_))));
        assert_eq!(t.state().await, TransportState::Unbound);
        assert_eq!(t.queued().await, 0);
    }

    #[tokio::test]
    async fn test_flush_to_closed_request_keeps_packet_queued() {
        let t = transport();
        t.send_event(Packet::new("chat")).await.unwrap();
        let (h, pending) = long_poll();
        drop(pending);

        assert!(t.bind(h).await.is_err());
        assert_eq!(t.queued().await, 1);
    }

    // -----------------------------------------------------------------------
    // send_event_once
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_event_once_drops_redelivery() {
        let t = transport();
        let p = Packet::new("chat");
        assert_eq!(t.send_event_once(9, p.clone()).await.unwrap(), SendOutcome::Queued);
        assert_eq!(t.send_event_once(9, p).await.unwrap(), SendOutcome::Duplicate);
        assert_eq!(t.queued().await, 1);
    }

    #[tokio::test]
    async fn test_send_event_once_failed_delivery_can_retry() {
        let t = transport();
        let (h, pending) = long_poll();
        t.bind(h).await.unwrap();
        drop(pending);
        assert!(t.send_event_once(3, Packet::new("chat")).await.is_err());
        assert_eq!(t.send_event_once(3, Packet::new("chat")).await.unwrap(), SendOutcome::Queued);
    }

    // -----------------------------------------------------------------------
    // close
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_close_sends_farewell_and_cancels_consumer() {
        let t = transport();
        let (h, pending) = long_poll();
        t.bind(h).await.unwrap();
        let (handle, mut signal) = cancel_pair();
        t.attach_consumer(handle).await;

        let bye = Packet::new("logout").with("msg", "Heartbeat timeout");
        assert!(t.close(Some(bye.clone())).await);
        signal.cancelled().await;
        assert_eq!(received(pending).await, bye);
        assert_eq!(t.state().await, TransportState::Closed);
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let t = transport();
        assert!(t.close(None).await);
        assert!(!t.close(None).await);
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_work() {
        let t = transport();
        t.close(None).await;
        let (h, _pending) = long_poll();
        assert!(matches!(t.bind(h).await, Err(TransportError::Shutdown(_))));
        assert!(matches!(t.send_event(Packet::new("chat")).await, Err(TransportError::Shutdown(_))));

        let (handle, mut signal) = cancel_pair();
        t.attach_consumer(handle).await;
        signal.cancelled().await;
    }

    #[test]
    fn test_generate_nonce_is_hex() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 64);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(nonce, generate_nonce());
    }
}
