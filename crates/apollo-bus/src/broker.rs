//! Broker primitives and the handle used to reach a broker.
//!
//! The bus needs a small set of operations from whatever broker sits
//! underneath: queues, topic bindings, publish, consume with manual
//! acknowledgement. They are expressed as a [`BrokerCommand`] protocol
//! served by a single task. All channel operations of a process funnel
//! through that task in arrival order, so no two of them ever interleave.
//!
//! [`BrokerHandle`] is the cheap, cloneable sender side. The in-process
//! broker in [`memory`](crate::memory) is one server of this protocol; a
//! network broker would be another task consuming the same commands.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::BusError;

/// Identifies one consumer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub u64);

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctag-{}", self.0)
    }
}

/// Identifies one delivery of one message to one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dtag-{}", self.0)
    }
}

/// A message handed to a consumer, awaiting ack or reject.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    /// Broker-assigned id; stays the same across redeliveries.
    pub message_id: u64,
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// `true` if this message was rejected with requeue before.
    pub redelivered: bool,
}

/// An active consumer: its tag and the inbox deliveries arrive on.
///
/// The inbox closes when the consumer is cancelled or its queue deleted.
#[derive(Debug)]
pub struct Subscription {
    pub tag: ConsumerTag,
    pub inbox: mpsc::UnboundedReceiver<Delivery>,
}

/// Queue declaration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survive a broker restart, if the broker persists anything.
    pub durable: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { durable: true }
    }
}

/// Snapshot of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub durable: bool,
    /// Messages waiting (not yet delivered).
    pub messages: usize,
    /// Delivered but not yet acked or rejected.
    pub unacked: usize,
    pub consumers: usize,
    /// Bound patterns, sorted.
    pub bindings: Vec<String>,
}

/// Commands served by a broker task.
///
/// Every variant carries a reply channel; the broker answers each command
/// before reading the next one.
#[derive(Debug)]
pub enum BrokerCommand {
    /// Create a queue; no-op if it exists.
    Declare {
        queue: String,
        options: QueueOptions,
        reply: oneshot::Sender<()>,
    },
    /// Delete a queue with its bindings, messages and consumers. Replies
    /// whether it existed.
    Delete {
        queue: String,
        reply: oneshot::Sender<bool>,
    },
    Bind {
        queue: String,
        pattern: String,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    Unbind {
        queue: String,
        pattern: String,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    /// Unbind `from` and bind `to` as one step.
    Rebind {
        queue: String,
        from: String,
        to: String,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    /// Route a message; replies with how many queues received it.
    Publish {
        routing_key: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<usize>,
    },
    /// Start consuming. `prefetch` caps unacked deliveries in flight.
    Consume {
        queue: String,
        prefetch: usize,
        reply: oneshot::Sender<Result<Subscription, BusError>>,
    },
    /// Stop a consumer. Its unacked deliveries stay outstanding until
    /// acked or rejected. Replies whether it existed.
    Cancel {
        consumer: ConsumerTag,
        reply: oneshot::Sender<bool>,
    },
    Ack {
        delivery: DeliveryTag,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    Reject {
        delivery: DeliveryTag,
        requeue: bool,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    Inspect {
        queue: String,
        reply: oneshot::Sender<Option<QueueInfo>>,
    },
}

/// Handle to a running broker task.
///
/// Cheap to clone; it's just an `mpsc::Sender`. When every handle is
/// dropped the broker task stops.
#[derive(Clone, Debug)]
pub struct BrokerHandle {
    sender: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    /// Wraps the command sender of a broker task.
    pub fn from_sender(sender: mpsc::Sender<BrokerCommand>) -> Self {
        Self { sender }
    }

    /// Whether the broker task is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand,
    ) -> Result<T, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| BusError::BrokerUnavailable)?;
        reply_rx.await.map_err(|_| BusError::BrokerUnavailable)
    }

    pub async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<(), BusError> {
        let queue = queue.to_owned();
        self.request(|reply| BrokerCommand::Declare { queue, options, reply }).await
    }

    pub async fn delete_queue(&self, queue: &str) -> Result<bool, BusError> {
        let queue = queue.to_owned();
        self.request(|reply| BrokerCommand::Delete { queue, reply }).await
    }

    pub async fn bind(&self, queue: &str, pattern: &str) -> Result<(), BusError> {
        let (queue, pattern) = (queue.to_owned(), pattern.to_owned());
        self.request(|reply| BrokerCommand::Bind { queue, pattern, reply }).await?
    }

    pub async fn unbind(&self, queue: &str, pattern: &str) -> Result<(), BusError> {
        let (queue, pattern) = (queue.to_owned(), pattern.to_owned());
        self.request(|reply| BrokerCommand::Unbind { queue, pattern, reply }).await?
    }

    pub async fn rebind(&self, queue: &str, from: &str, to: &str) -> Result<(), BusError> {
        let (queue, from, to) = (queue.to_owned(), from.to_owned(), to.to_owned());
        self.request(|reply| BrokerCommand::Rebind { queue, from, to, reply }).await?
    }

    pub async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        let routing_key = routing_key.to_owned();
        self.request(|reply| BrokerCommand::Publish { routing_key, payload, reply }).await
    }

    pub async fn consume(&self, queue: &str, prefetch: usize) -> Result<Subscription, BusError> {
        let queue = queue.to_owned();
        self.request(|reply| BrokerCommand::Consume { queue, prefetch, reply }).await?
    }

    pub async fn cancel(&self, consumer: ConsumerTag) -> Result<bool, BusError> {
        self.request(|reply| BrokerCommand::Cancel { consumer, reply }).await
    }

    pub async fn ack(&self, delivery: DeliveryTag) -> Result<(), BusError> {
        self.request(|reply| BrokerCommand::Ack { delivery, reply }).await?
    }

    pub async fn reject(&self, delivery: DeliveryTag, requeue: bool) -> Result<(), BusError> {
        self.request(|reply| BrokerCommand::Reject { delivery, requeue, reply }).await?
    }

    pub async fn inspect(&self, queue: &str) -> Result<Option<QueueInfo>, BusError> {
        let queue = queue.to_owned();
        self.request(|reply| BrokerCommand::Inspect { queue, reply }).await
    }
}
