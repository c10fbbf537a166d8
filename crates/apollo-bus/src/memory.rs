//! In-process topic broker.
//!
//! The broker is an actor: one Tokio task owns every queue, binding and
//! consumer, and the rest of the process talks to it through a
//! [`BrokerHandle`]. There is no shared mutable state, so channel
//! operations are serialized for free and a rebind is atomic with respect
//! to every publish.
//!
//! Semantics follow a topic exchange with manual acknowledgement:
//! - a published message is copied once into each queue with at least one
//!   matching binding;
//! - a queue hands messages to its consumers round-robin, never exceeding a
//!   consumer's prefetch of unacked deliveries;
//! - reject with requeue puts the message back at the head of its queue;
//! - deliveries held by a consumer whose inbox was dropped are requeued.
//!
//! Nothing is persisted; `durable` is recorded and reported only.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tokio::sync::mpsc;

use crate::{
    BrokerCommand, BrokerHandle, BusError, ConsumerTag, Delivery, DeliveryTag, QueueInfo,
    QueueOptions, Subscription, topic_matches,
};

#[derive(Debug, Clone)]
struct Message {
    id: u64,
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

struct Queue {
    options: QueueOptions,
    messages: VecDeque<Message>,
    bindings: BTreeSet<String>,
    consumers: Vec<ConsumerTag>,
    /// Round-robin cursor into `consumers`.
    cursor: usize,
}

struct Consumer {
    queue: String,
    inbox: mpsc::UnboundedSender<Delivery>,
    prefetch: usize,
    unacked: usize,
}

struct Unacked {
    queue: String,
    consumer: ConsumerTag,
    message: Message,
}

/// The broker actor state. Runs inside a Tokio task.
struct MemoryBroker {
    queues: HashMap<String, Queue>,
    consumers: HashMap<ConsumerTag, Consumer>,
    unacked: HashMap<DeliveryTag, Unacked>,
    next_message: u64,
    next_delivery: u64,
    next_consumer: u64,
    receiver: mpsc::Receiver<BrokerCommand>,
}

impl MemoryBroker {
    async fn run(mut self) {
        tracing::debug!("memory broker started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                BrokerCommand::Declare { queue, options, reply } => {
                    self.declare(queue, options);
                    let _ = reply.send(());
                }
                BrokerCommand::Delete { queue, reply } => {
                    let _ = reply.send(self.delete(&queue));
                }
                BrokerCommand::Bind { queue, pattern, reply } => {
                    let _ = reply.send(self.bind(&queue, pattern));
                }
                BrokerCommand::Unbind { queue, pattern, reply } => {
                    self.unbind(&queue, &pattern);
                    let _ = reply.send(Ok(()));
                }
                BrokerCommand::Rebind { queue, from, to, reply } => {
                    let _ = reply.send(self.rebind(&queue, &from, to));
                }
                BrokerCommand::Publish { routing_key, payload, reply } => {
                    let _ = reply.send(self.publish(routing_key, payload));
                }
                BrokerCommand::Consume { queue, prefetch, reply } => {
                    let _ = reply.send(self.consume(&queue, prefetch));
                }
                BrokerCommand::Cancel { consumer, reply } => {
                    let _ = reply.send(self.cancel(consumer));
                }
                BrokerCommand::Ack { delivery, reply } => {
                    let _ = reply.send(self.settle(delivery, None));
                }
                BrokerCommand::Reject { delivery, requeue, reply } => {
                    let _ = reply.send(self.settle(delivery, Some(requeue)));
                }
                BrokerCommand::Inspect { queue, reply } => {
                    let _ = reply.send(self.inspect(&queue));
                }
            }
        }

        tracing::debug!("memory broker stopped");
    }

    fn declare(&mut self, name: String, options: QueueOptions) {
        if self.queues.contains_key(&name) {
            return;
        }
        tracing::trace!(queue = %name, durable = options.durable, "queue declared");
        self.queues.insert(
            name,
            Queue {
                options,
                messages: VecDeque::new(),
                bindings: BTreeSet::new(),
                consumers: Vec::new(),
                cursor: 0,
            },
        );
    }

    fn delete(&mut self, name: &str) -> bool {
        let Some(queue) = self.queues.remove(name) else {
            return false;
        };
        // Dropping the consumers drops their inbox senders, which closes
        // every subscription on this queue.
        for tag in &queue.consumers {
            self.consumers.remove(tag);
        }
        self.unacked.retain(|_, u| u.queue != name);
        tracing::trace!(queue = %name, dropped = queue.messages.len(), "queue deleted");
        true
    }

    fn bind(&mut self, name: &str, pattern: String) -> Result<(), BusError> {
        let queue = self
            .queues
            .get_mut(name)
            .ok_or_else(|| BusError::QueueNotFound(name.to_owned()))?;
        if queue.bindings.insert(pattern) {
            tracing::trace!(queue = %name, "binding added");
        }
        Ok(())
    }

    fn unbind(&mut self, name: &str, pattern: &str) {
        if let Some(queue) = self.queues.get_mut(name) {
            queue.bindings.remove(pattern);
        }
    }

    fn rebind(&mut self, name: &str, from: &str, to: String) -> Result<(), BusError> {
        let queue = self
            .queues
            .get_mut(name)
            .ok_or_else(|| BusError::QueueNotFound(name.to_owned()))?;
        queue.bindings.remove(from);
        queue.bindings.insert(to);
        Ok(())
    }

    fn publish(&mut self, routing_key: String, payload: Vec<u8>) -> usize {
        self.next_message += 1;
        let message = Message {
            id: self.next_message,
            routing_key,
            payload,
            redelivered: false,
        };

        let mut targets = Vec::new();
        for (name, queue) in &mut self.queues {
            if queue
                .bindings
                .iter()
                .any(|pattern| topic_matches(pattern, &message.routing_key))
            {
                queue.messages.push_back(message.clone());
                targets.push(name.clone());
            }
        }

        if targets.is_empty() {
            tracing::trace!(routing_key = %message.routing_key, "unroutable message dropped");
        }
        for name in &targets {
            self.dispatch(name);
        }
        targets.len()
    }

    fn consume(&mut self, name: &str, prefetch: usize) -> Result<Subscription, BusError> {
        let queue = self
            .queues
            .get_mut(name)
            .ok_or_else(|| BusError::QueueNotFound(name.to_owned()))?;

        self.next_consumer += 1;
        let tag = ConsumerTag(self.next_consumer);
        let (tx, rx) = mpsc::unbounded_channel();
        queue.consumers.push(tag);
        self.consumers.insert(
            tag,
            Consumer {
                queue: name.to_owned(),
                inbox: tx,
                prefetch: prefetch.max(1),
                unacked: 0,
            },
        );
        tracing::trace!(queue = %name, consumer = %tag, "consumer registered");

        self.dispatch(name);
        Ok(Subscription { tag, inbox: rx })
    }

    fn cancel(&mut self, tag: ConsumerTag) -> bool {
        let Some(consumer) = self.consumers.remove(&tag) else {
            return false;
        };
        if let Some(queue) = self.queues.get_mut(&consumer.queue) {
            queue.consumers.retain(|t| *t != tag);
        }
        tracing::trace!(queue = %consumer.queue, consumer = %tag, "consumer cancelled");
        true
    }

    /// Acks (`requeue == None`) or rejects a delivery.
    fn settle(&mut self, tag: DeliveryTag, requeue: Option<bool>) -> Result<(), BusError> {
        let Unacked { queue: name, consumer, mut message } =
            self.unacked.remove(&tag).ok_or(BusError::UnknownDelivery(tag))?;

        if let Some(c) = self.consumers.get_mut(&consumer) {
            c.unacked = c.unacked.saturating_sub(1);
        }
        if requeue == Some(true) {
            if let Some(queue) = self.queues.get_mut(&name) {
                message.redelivered = true;
                queue.messages.push_front(message);
            }
        }
        self.dispatch(&name);
        Ok(())
    }

    fn inspect(&self, name: &str) -> Option<QueueInfo> {
        let queue = self.queues.get(name)?;
        Some(QueueInfo {
            name: name.to_owned(),
            durable: queue.options.durable,
            messages: queue.messages.len(),
            unacked: self.unacked.values().filter(|u| u.queue == name).count(),
            consumers: queue.consumers.len(),
            bindings: queue.bindings.iter().cloned().collect(),
        })
    }

    /// Hands waiting messages of one queue to consumers with spare
    /// prefetch until either runs out.
    fn dispatch(&mut self, name: &str) {
        let Some(queue) = self.queues.get(name) else {
            return;
        };
        let dead: Vec<ConsumerTag> = queue
            .consumers
            .iter()
            .copied()
            .filter(|tag| self.consumers.get(tag).is_some_and(|c| c.inbox.is_closed()))
            .collect();
        for tag in dead {
            self.drop_dead_consumer(tag);
        }

        loop {
            let Some(queue) = self.queues.get_mut(name) else {
                return;
            };
            if queue.messages.is_empty() || queue.consumers.is_empty() {
                return;
            }

            let count = queue.consumers.len();
            let chosen = (0..count)
                .map(|offset| (queue.cursor + offset) % count)
                .find(|&idx| {
                    self.consumers
                        .get(&queue.consumers[idx])
                        .is_some_and(|c| c.unacked < c.prefetch)
                });
            let Some(idx) = chosen else {
                return;
            };
            let tag = queue.consumers[idx];
            queue.cursor = (idx + 1) % count;
            let Some(message) = queue.messages.pop_front() else {
                return;
            };

            self.next_delivery += 1;
            let delivery_tag = DeliveryTag(self.next_delivery);
            let delivery = Delivery {
                tag: delivery_tag,
                message_id: message.id,
                routing_key: message.routing_key.clone(),
                payload: message.payload.clone(),
                redelivered: message.redelivered,
            };

            let sent = match self.consumers.get_mut(&tag) {
                Some(consumer) if consumer.inbox.send(delivery).is_ok() => {
                    consumer.unacked += 1;
                    true
                }
                _ => false,
            };

            if sent {
                self.unacked.insert(
                    delivery_tag,
                    Unacked {
                        queue: name.to_owned(),
                        consumer: tag,
                        message,
                    },
                );
            } else {
                queue.messages.push_front(message);
                self.drop_dead_consumer(tag);
            }
        }
    }

    /// Removes a consumer whose inbox is gone and requeues what it held.
    fn drop_dead_consumer(&mut self, tag: ConsumerTag) {
        self.cancel(tag);

        let mut held: Vec<(DeliveryTag, Unacked)> = Vec::new();
        let tags: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.consumer == tag)
            .map(|(t, _)| *t)
            .collect();
        for t in tags {
            if let Some(u) = self.unacked.remove(&t) {
                held.push((t, u));
            }
        }
        // Oldest delivery ends up at the head of the queue.
        held.sort_by_key(|(t, _)| std::cmp::Reverse(t.0));
        for (_, Unacked { queue, mut message, .. }) in held {
            if let Some(q) = self.queues.get_mut(&queue) {
                message.redelivered = true;
                q.messages.push_front(message);
            }
        }
        tracing::debug!(consumer = %tag, "dead consumer dropped");
    }
}

/// Spawns an in-process broker task and returns a handle to it.
///
/// `channel_size` bounds the command channel; callers wait when it fills.
pub fn spawn_memory_broker(channel_size: usize) -> BrokerHandle {
    let (tx, rx) = mpsc::channel(channel_size.max(1));

    let broker = MemoryBroker {
        queues: HashMap::new(),
        consumers: HashMap::new(),
        unacked: HashMap::new(),
        next_message: 0,
        next_delivery: 0,
        next_consumer: 0,
        receiver: rx,
    };

    tokio::spawn(broker.run());

    BrokerHandle::from_sender(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker_with_queue(name: &str, pattern: &str) -> BrokerHandle {
        let broker = spawn_memory_broker(16);
        broker.declare_queue(name, QueueOptions::default()).await.unwrap();
        broker.bind(name, pattern).await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_declare_is_idempotent_and_keeps_messages() {
        let broker = broker_with_queue("q", "ex.user.1").await;
        broker.publish("ex.user.1", b"a".to_vec()).await.unwrap();
        broker.declare_queue("q", QueueOptions { durable: false }).await.unwrap();

        let info = broker.inspect("q").await.unwrap().unwrap();
        assert_eq!(info.messages, 1);
        assert!(info.durable);
    }

    #[tokio::test]
    async fn test_double_bind_delivers_once() {
        let broker = broker_with_queue("q", "ex.user.1").await;
        broker.bind("q", "ex.user.1").await.unwrap();
        broker.bind("q", "ex.user.*").await.unwrap();

        assert_eq!(broker.publish("ex.user.1", b"a".to_vec()).await.unwrap(), 1);
        let info = broker.inspect("q").await.unwrap().unwrap();
        assert_eq!(info.messages, 1);
        assert_eq!(info.bindings, vec!["ex.user.*".to_owned(), "ex.user.1".to_owned()]);
    }

    #[tokio::test]
    async fn test_bind_missing_queue_fails_but_unbind_is_noop() {
        let broker = spawn_memory_broker(16);
        assert!(matches!(broker.bind("nope", "ex.global").await, Err(BusError::QueueNotFound(_))));
        broker.unbind("nope", "ex.global").await.unwrap();
        assert!(!broker.delete_queue("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_unroutable_publish_reaches_nothing() {
        let broker = broker_with_queue("q", "ex.user.1").await;
        assert_eq!(broker.publish("ex.user.2", b"a".to_vec()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rebind_moves_binding_in_one_step() {
        let broker = broker_with_queue("q", "ex.loc.1").await;
        broker.rebind("q", "ex.loc.1", "ex.loc.2").await.unwrap();

        let info = broker.inspect("q").await.unwrap().unwrap();
        assert_eq!(info.bindings, vec!["ex.loc.2".to_owned()]);
        assert_eq!(broker.publish("ex.loc.1", b"old".to_vec()).await.unwrap(), 0);
        assert_eq!(broker.publish("ex.loc.2", b"new".to_vec()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prefetch_limits_in_flight_deliveries() {
        let broker = broker_with_queue("q", "ex.global").await;
        for n in 0..3u8 {
            broker.publish("ex.global", vec![n]).await.unwrap();
        }

        let mut sub = broker.consume("q", 1).await.unwrap();
        let first = sub.inbox.recv().await.unwrap();
        assert_eq!(first.payload, vec![0]);
        assert!(sub.inbox.try_recv().is_err());

        broker.ack(first.tag).await.unwrap();
        let second = sub.inbox.recv().await.unwrap();
        assert_eq!(second.payload, vec![1]);
        assert!(matches!(broker.ack(first.tag).await, Err(BusError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn test_reject_requeue_goes_to_head_and_keeps_id() {
        let broker = broker_with_queue("q", "ex.global").await;
        broker.publish("ex.global", b"first".to_vec()).await.unwrap();
        broker.publish("ex.global", b"second".to_vec()).await.unwrap();

        let mut sub = broker.consume("q", 1).await.unwrap();
        let first = sub.inbox.recv().await.unwrap();
        broker.cancel(sub.tag).await.unwrap();
        broker.reject(first.tag, true).await.unwrap();

        let mut again = broker.consume("q", 1).await.unwrap();
        let redelivered = again.inbox.recv().await.unwrap();
        assert_eq!(redelivered.payload, b"first".to_vec());
        assert_eq!(redelivered.message_id, first.message_id);
        assert!(redelivered.redelivered);
    }

    #[tokio::test]
    async fn test_reject_without_requeue_discards() {
        let broker = broker_with_queue("q", "ex.global").await;
        broker.publish("ex.global", b"x".to_vec()).await.unwrap();
        let mut sub = broker.consume("q", 1).await.unwrap();
        let d = sub.inbox.recv().await.unwrap();
        broker.reject(d.tag, false).await.unwrap();

        let info = broker.inspect("q").await.unwrap().unwrap();
        assert_eq!((info.messages, info.unacked), (0, 0));
    }

    #[tokio::test]
    async fn test_dropped_inbox_requeues_unacked() {
        let broker = broker_with_queue("q", "ex.global").await;
        let sub = broker.consume("q", 1).await.unwrap();
        broker.publish("ex.global", b"a".to_vec()).await.unwrap();
        drop(sub);

        // The next dispatch finds the consumer dead and hands its unacked
        // message back to the queue, ahead of the new one.
        broker.publish("ex.global", b"b".to_vec()).await.unwrap();
        let info = broker.inspect("q").await.unwrap().unwrap();
        assert_eq!(info.consumers, 0);
        assert_eq!(info.messages, 2);
        assert_eq!(info.unacked, 0);

        let mut sub = broker.consume("q", 1).await.unwrap();
        assert_eq!(sub.inbox.recv().await.unwrap().payload, b"a".to_vec());
    }

    #[tokio::test]
    async fn test_delete_queue_closes_subscription() {
        let broker = broker_with_queue("q", "ex.global").await;
        let mut sub = broker.consume("q", 1).await.unwrap();
        assert!(broker.delete_queue("q").await.unwrap());
        assert!(sub.inbox.recv().await.is_none());
        assert!(broker.inspect("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_reports_unavailable_after_broker_stops() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let broker = BrokerHandle::from_sender(tx);
        assert!(!broker.is_connected());
        assert!(matches!(
            broker.publish("ex.global", Vec::new()).await,
            Err(BusError::BrokerUnavailable)
        ));
    }
}
