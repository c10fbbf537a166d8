//! One-shot consumer: one broker message into one parked request.
//!
//! An events request that found nothing queued on its transport starts a
//! [`Consumer`]. The consumer subscribes to the session's private queue,
//! takes the first message, hands it to the transport and cancels itself.
//! Anything else the broker pushed into its inbox in the meantime is
//! rejected with requeue, so the next request sees it.
//!
//! Acknowledgement happens after the hand-off. A request that went away
//! before the write leaves the message requeued; the transport remembers
//! message ids it accepted and ignores a redelivery of one of them.

use std::sync::Arc;

use apollo_protocol::{Channel, Codec, Destination, JsonCodec, Packet, SessionToken, private_queue};
use apollo_session::{Session, Store};
use apollo_transport::{CancelSignal, Handler, SendOutcome, Transport, TransportError, cancel_pair};

use crate::{Bus, BusError, ConsumerTag, Delivery, DeliveryTag, Subscription, consumer_bindings};

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Ack,
    Requeue,
    Discard,
}

/// A single-use subscriber feeding one transport.
pub struct Consumer<S: Store, H: Handler> {
    bus: Bus,
    store: Arc<S>,
    transport: Arc<Transport<H>>,
    codec: JsonCodec,
    rejecting: bool,
}

impl<S: Store, H: Handler> Consumer<S, H> {
    pub fn new(bus: Bus, store: Arc<S>, transport: Arc<Transport<H>>) -> Self {
        Self {
            bus,
            store,
            transport,
            codec: JsonCodec,
            rejecting: false,
        }
    }

    fn token(&self) -> &SessionToken {
        self.transport.token()
    }

    /// Starts consuming.
    ///
    /// Looks the session up, makes sure its private queue exists with the
    /// bindings every consumer relies on, subscribes and spawns the
    /// delivery task. The transport receives the task's cancel handle.
    ///
    /// # Errors
    /// - `SessionNotFound` if the store has no record for the token.
    /// - Any broker error raised while declaring, binding or subscribing.
    pub async fn eat(self) -> Result<ConsumerTag, BusError> {
        let token = self.token().clone();
        let Some(session) = self.store.get::<Session>(&token).await? else {
            tracing::warn!(%token, "consumer for unknown session not started");
            return Err(BusError::SessionNotFound(token));
        };

        let queue = private_queue(&token);
        self.bus.declare_queue(&queue).await?;
        for destination in consumer_bindings(&session) {
            self.bus.bind_queue(&queue, &destination).await?;
        }

        let subscription = self.bus.subscribe(&queue).await?;
        let tag = subscription.tag;
        let (handle, signal) = cancel_pair();
        self.transport.attach_consumer(handle).await;
        tracing::trace!(%token, consumer = %tag, "consumer started");

        tokio::spawn(self.run(subscription, signal));
        Ok(tag)
    }

    async fn run(mut self, mut subscription: Subscription, mut cancel: CancelSignal) {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            delivery = subscription.inbox.recv() => delivery,
        };

        let settlement = match first {
            Some(delivery) => self.on_message(delivery).await,
            None => None,
        };

        self.shutdown(subscription, settlement).await;
    }

    /// Hands one delivery to the transport. Returns how to settle it, or
    /// `None` if it was already settled.
    async fn on_message(&mut self, delivery: Delivery) -> Option<(DeliveryTag, Settle)> {
        if self.rejecting {
            if let Err(e) = self.bus.reject(delivery.tag, true).await {
                tracing::warn!(token = %self.token(), error = %e, "requeue of surplus delivery failed");
            }
            return None;
        }
        self.rejecting = true;

        Some((delivery.tag, self.hand_off(delivery).await))
    }

    async fn hand_off(&self, delivery: Delivery) -> Settle {
        let token = self.token();

        match Destination::parse(&delivery.routing_key) {
            Ok(destination) if destination.channel == Channel::Ex => {}
            _ => {
                tracing::warn!(%token, routing_key = %delivery.routing_key, "non-client message on private queue discarded");
                return Settle::Discard;
            }
        }

        let packet: Packet = match self.codec.decode(&delivery.payload) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(%token, error = %e, "undecodable message discarded");
                return Settle::Discard;
            }
        };

        match self
            .transport
            .send_event_once(delivery.message_id, packet)
            .await
        {
            Ok(SendOutcome::Duplicate) => Settle::Ack,
            Ok(outcome) => {
                tracing::debug!(%token, message_id = delivery.message_id, ?outcome, "delivered");
                Settle::Ack
            }
            Err(TransportError::DeliveryToClosedConnection(connection)) => {
                tracing::warn!(%token, %connection, "dropped packet due to closed request");
                Settle::Requeue
            }
            Err(TransportError::Shutdown(_)) => Settle::Requeue,
            Err(e) => {
                tracing::warn!(%token, error = %e, "packet could not be written");
                Settle::Discard
            }
        }
    }

    /// Cancels the subscription, settles the handled delivery and requeues
    /// whatever else had already arrived.
    async fn shutdown(mut self, mut subscription: Subscription, settlement: Option<(DeliveryTag, Settle)>) {
        self.rejecting = true;
        let token = self.token().clone();

        // Cancel before settling, so acking doesn't pull the next message
        // into an inbox nobody reads.
        if let Err(e) = self.bus.unsubscribe(subscription.tag).await {
            tracing::warn!(%token, error = %e, "consumer cancel failed");
        }

        if let Some((tag, settle)) = settlement {
            let result = match settle {
                Settle::Ack => self.bus.ack(tag).await,
                Settle::Requeue => self.bus.reject(tag, true).await,
                Settle::Discard => self.bus.reject(tag, false).await,
            };
            if let Err(e) = result {
                tracing::warn!(%token, error = %e, "delivery settlement failed");
            }
        }

        // The broker closed the inbox on cancel; drain what was in flight.
        while let Some(delivery) = subscription.inbox.recv().await {
            self.on_message(delivery).await;
        }

        tracing::trace!(%token, consumer = %subscription.tag, "consumer finished");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use apollo_protocol::{Scope, UserId};
    use apollo_session::MemoryStore;
    use apollo_transport::{PollResponder, long_poll};

    use super::*;
    use crate::{BrokerConfig, spawn_memory_broker};

    async fn setup(prefetch: usize) -> (Bus, Arc<MemoryStore>, Arc<Transport<PollResponder>>) {
        let bus = Bus::with_broker(spawn_memory_broker(16), prefetch);
        let store = Arc::new(MemoryStore::new());
        let token = SessionToken::new("tok");
        let mut session = Session::new(token.clone(), SystemTime::now());
        session.user_id = Some(UserId(9));
        store.save(session).await.unwrap();
        (bus, store, Arc::new(Transport::new(token)))
    }

    fn decode(bytes: &[u8]) -> Packet {
        JsonCodec.decode(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_eat_unknown_session_fails() {
        let bus = Bus::connect(&BrokerConfig::default()).unwrap();
        let store = Arc::new(MemoryStore::new());
        let transport: Arc<Transport<PollResponder>> = Arc::new(Transport::new(SessionToken::new("ghost")));

        let consumer = Consumer::new(bus.clone(), store, transport);
        assert!(matches!(consumer.eat().await, Err(BusError::SessionNotFound(_))));
        assert!(bus.inspect("ex-ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eat_binds_session_global_and_user() {
        let (bus, store, transport) = setup(1).await;
        Consumer::new(bus.clone(), store, transport).eat().await.unwrap();

        let info = bus.inspect("ex-tok").await.unwrap().unwrap();
        assert_eq!(info.bindings, vec!["ex.global", "ex.session.tok", "ex.user.9"]);
        assert_eq!(info.consumers, 1);
    }

    #[tokio::test]
    async fn test_delivers_one_packet_and_acks() {
        let (bus, store, transport) = setup(1).await;
        let (responder, pending) = long_poll();
        transport.bind(responder).await.unwrap();
        Consumer::new(bus.clone(), store, transport.clone()).eat().await.unwrap();

        let dest = Destination::ex(Scope::User(UserId(9)));
        bus.publish(&dest, &Packet::new("chat").with("msg", "hi")).await.unwrap();

        let payload = pending.wait_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(decode(&payload).str_field("msg"), Some("hi"));

        // Settlement happens after the hand-off; give the task a moment.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let info = bus.inspect("ex-tok").await.unwrap().unwrap();
        assert_eq!((info.messages, info.unacked, info.consumers), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_single_delivery_requeues_the_rest() {
        let (bus, store, transport) = setup(4).await;
        bus.declare_queue("ex-tok").await.unwrap();
        bus.bind_queue("ex-tok", &Destination::ex(Scope::Global)).await.unwrap();
        for n in 1..=3 {
            bus.publish(&Destination::ex(Scope::Global), &Packet::new("chat").with("n", n))
                .await
                .unwrap();
        }

        let (responder, pending) = long_poll();
        transport.bind(responder).await.unwrap();
        Consumer::new(bus.clone(), store, transport.clone()).eat().await.unwrap();

        let payload = pending.wait_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(decode(&payload).u64_field("n"), Some(1));

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        let info = bus.inspect("ex-tok").await.unwrap().unwrap();
        assert_eq!(info.messages, 2);
        assert_eq!(info.unacked, 0);
        assert_eq!(info.consumers, 0);
        assert_eq!(transport.queued().await, 0);
    }

    #[tokio::test]
    async fn test_closed_request_requeues_message() {
        let (bus, store, transport) = setup(1).await;
        let (responder, pending) = long_poll();
        transport.bind(responder).await.unwrap();
        drop(pending);
        Consumer::new(bus.clone(), store, transport.clone()).eat().await.unwrap();

        bus.publish(&Destination::ex(Scope::Global), &Packet::new("chat"))
            .await
            .unwrap();
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let info = bus.inspect("ex-tok").await.unwrap().unwrap();
        assert_eq!(info.messages, 1);
        assert_eq!(info.consumers, 0);
    }

    #[tokio::test]
    async fn test_rebind_cancels_previous_consumer() {
        let (bus, store, transport) = setup(1).await;
        let (first, _pending) = long_poll();
        transport.bind(first).await.unwrap();
        Consumer::new(bus.clone(), store, transport.clone()).eat().await.unwrap();

        let (second, _pending2) = long_poll();
        transport.bind(second).await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let info = bus.inspect("ex-tok").await.unwrap().unwrap();
        assert_eq!(info.consumers, 0);
    }
}
