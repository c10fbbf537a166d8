//! The message bus: the one place a process touches the broker.
//!
//! [`Bus`] wraps a [`BrokerHandle`] with packet encoding, destination
//! rendering and the `ready` flag. It is `Clone`; every clone talks to the
//! same broker task, so channel operations from all over the process are
//! still serialized in one place.
//!
//! [`Bus::listen_inter`] starts the process's inter listener: a long-lived
//! consumer on `inter.#` that hands every server-to-server packet to an
//! [`InterHandler`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use apollo_protocol::{Channel, Codec, Destination, JsonCodec, Packet, inter_queue};
use tokio::task::JoinHandle;

use crate::{
    BrokerConfig, BrokerHandle, BusError, ConsumerTag, DeliveryTag, QueueInfo, QueueOptions,
    Subscription, spawn_memory_broker,
};

/// Receives inter-server packets picked up by the inter listener.
///
/// The payload is handed over undecoded; the handler owns the packet
/// registry and decides what to do with names it doesn't know.
pub trait InterHandler: Send + Sync + 'static {
    fn on_inter(&self, destination: Destination, payload: Vec<u8>) -> impl Future<Output = ()> + Send;
}

/// Process-wide handle to the broker.
#[derive(Clone, Debug)]
pub struct Bus {
    broker: BrokerHandle,
    codec: JsonCodec,
    ready: Arc<AtomicBool>,
    prefetch: usize,
}

impl Bus {
    /// Connects to the broker named by `config`.
    ///
    /// # Errors
    /// `UnsupportedBroker` if the URL scheme has no implementation here.
    pub fn connect(config: &BrokerConfig) -> Result<Self, BusError> {
        match config.scheme().as_str() {
            "memory" => {
                tracing::info!(url = %config.url, "using in-process broker");
                let broker = spawn_memory_broker(config.channel_size);
                Ok(Self::with_broker(broker, config.prefetch))
            }
            other => Err(BusError::UnsupportedBroker(other.to_owned())),
        }
    }

    /// Wraps an already running broker.
    pub fn with_broker(broker: BrokerHandle, prefetch: usize) -> Self {
        Self {
            broker,
            codec: JsonCodec,
            ready: Arc::new(AtomicBool::new(false)),
            prefetch: prefetch.max(1),
        }
    }

    /// `true` once the broker is reachable and the process topology is
    /// declared.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.broker.is_connected()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Fails with `NotReady` or `BrokerUnavailable` unless [`is_ready`](Self::is_ready).
    pub fn ensure_ready(&self) -> Result<(), BusError> {
        if !self.broker.is_connected() {
            Err(BusError::BrokerUnavailable)
        } else if !self.ready.load(Ordering::Acquire) {
            Err(BusError::NotReady)
        } else {
            Ok(())
        }
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Publishes a packet. Returns how many queues it reached.
    pub async fn publish(&self, destination: &Destination, packet: &Packet) -> Result<usize, BusError> {
        let payload = self.codec.encode(packet)?;
        tracing::debug!(
            destination = %destination,
            payload = %String::from_utf8_lossy(&payload),
            "publish"
        );
        self.broker.publish(&destination.routing_key(), payload).await
    }

    /// Creates a durable queue; no-op if it exists.
    pub async fn declare_queue(&self, queue: &str) -> Result<(), BusError> {
        self.broker.declare_queue(queue, QueueOptions::default()).await
    }

    pub async fn declare_queue_with(&self, queue: &str, options: QueueOptions) -> Result<(), BusError> {
        self.broker.declare_queue(queue, options).await
    }

    /// Deletes a queue; `false` if there was none.
    pub async fn delete_queue(&self, queue: &str) -> Result<bool, BusError> {
        self.broker.delete_queue(queue).await
    }

    pub async fn bind_queue(&self, queue: &str, destination: &Destination) -> Result<(), BusError> {
        self.broker.bind(queue, &destination.routing_key()).await
    }

    /// Binds a raw topic pattern such as `inter.#`.
    pub async fn bind_pattern(&self, queue: &str, pattern: &str) -> Result<(), BusError> {
        self.broker.bind(queue, pattern).await
    }

    pub async fn unbind_queue(&self, queue: &str, destination: &Destination) -> Result<(), BusError> {
        self.broker.unbind(queue, &destination.routing_key()).await
    }

    /// Moves one binding of `queue` from `from` to `to` in a single broker
    /// step; no publish can observe both or neither.
    pub async fn rebind_queue(
        &self,
        queue: &str,
        from: &Destination,
        to: &Destination,
    ) -> Result<(), BusError> {
        self.broker
            .rebind(queue, &from.routing_key(), &to.routing_key())
            .await
    }

    /// Starts consuming `queue` with the configured prefetch.
    pub async fn subscribe(&self, queue: &str) -> Result<Subscription, BusError> {
        self.broker.consume(queue, self.prefetch).await
    }

    pub async fn unsubscribe(&self, consumer: ConsumerTag) -> Result<bool, BusError> {
        self.broker.cancel(consumer).await
    }

    pub async fn ack(&self, delivery: DeliveryTag) -> Result<(), BusError> {
        self.broker.ack(delivery).await
    }

    pub async fn reject(&self, delivery: DeliveryTag, requeue: bool) -> Result<(), BusError> {
        self.broker.reject(delivery, requeue).await
    }

    pub async fn inspect(&self, queue: &str) -> Result<Option<QueueInfo>, BusError> {
        self.broker.inspect(queue).await
    }

    /// Declares this process's inter queue, binds it to every inter
    /// routing key and spawns the listener task.
    ///
    /// The queue is not durable: it belongs to one process lifetime.
    /// Every delivery is acked once the handler returns; keys that don't
    /// parse as inter destinations are rejected without requeue.
    pub async fn listen_inter<H: InterHandler>(
        &self,
        server_id: &str,
        handler: Arc<H>,
    ) -> Result<JoinHandle<()>, BusError> {
        let queue = inter_queue(server_id);
        self.declare_queue_with(&queue, QueueOptions { durable: false })
            .await?;
        self.bind_pattern(&queue, &Destination::all(Channel::Inter))
            .await?;
        let mut subscription = self.subscribe(&queue).await?;
        tracing::info!(queue = %queue, "inter listener started");

        let bus = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(delivery) = subscription.inbox.recv().await {
                let settled = match Destination::parse(&delivery.routing_key) {
                    Ok(destination) if destination.channel == Channel::Inter => {
                        handler.on_inter(destination, delivery.payload).await;
                        bus.ack(delivery.tag).await
                    }
                    _ => {
                        tracing::warn!(routing_key = %delivery.routing_key, "discarding inter message with bad routing key");
                        bus.reject(delivery.tag, false).await
                    }
                };
                if let Err(e) = settled {
                    tracing::warn!(error = %e, "inter listener lost the broker");
                    break;
                }
            }
            tracing::debug!(queue = %queue, "inter listener stopped");
        }))
    }
}
