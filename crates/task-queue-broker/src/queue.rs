use crate::metrics::BrokerMetrics;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use task_queue_protocol::{DeliverMessage, Message};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type ConsumerId = u64;
pub type ConnectionId = u64;

/// Outgoing frames for one client connection
pub type Outbox = mpsc::UnboundedSender<Message>;

/// Broker-side accounting for a single queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub consumers: usize,
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    /// Highest number of unacknowledged deliveries any single consumer has held
    pub max_unacked_per_consumer: usize,
}

struct Envelope {
    body: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    id: ConsumerId,
    connection_id: ConnectionId,
    tag: String,
    prefetch_count: u16,
    unacked: BTreeMap<u64, Vec<u8>>,
    outbox: Outbox,
}

impl Consumer {
    fn has_capacity(&self) -> bool {
        self.prefetch_count == 0 || self.unacked.len() < self.prefetch_count as usize
    }
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Envelope>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    stats: QueueStats,
}

impl Queue {
    fn unacked(&self) -> usize {
        self.consumers.iter().map(|c| c.unacked.len()).sum()
    }

    /// Return a consumer's unacknowledged deliveries to the head of the queue,
    /// preserving their original order.
    fn requeue(
        &mut self,
        consumer: Consumer,
        owners: &mut HashMap<u64, (String, ConsumerId)>,
    ) -> usize {
        let count = consumer.unacked.len();
        for (tag, body) in consumer.unacked.into_iter().rev() {
            owners.remove(&tag);
            self.ready.push_front(Envelope {
                body,
                redelivered: true,
            });
        }
        count
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    /// delivery tag -> (queue, consumer)
    owners: HashMap<u64, (String, ConsumerId)>,
    next_delivery_tag: u64,
    next_consumer_id: ConsumerId,
}

/// In-memory FIFO queues with per-consumer prefetch accounting
pub struct QueueManager {
    state: Mutex<State>,
    metrics: Arc<BrokerMetrics>,
}

impl QueueManager {
    pub fn new(metrics: Arc<BrokerMetrics>) -> Self {
        QueueManager {
            state: Mutex::new(State::default()),
            metrics,
        }
    }

    /// Enqueue a message, creating the queue on first use
    pub fn publish(&self, queue_name: &str, body: Vec<u8>) {
        let mut state = self.state.lock();
        let State {
            queues,
            owners,
            next_delivery_tag,
            ..
        } = &mut *state;

        let queue = queues.entry(queue_name.to_string()).or_default();
        queue.ready.push_back(Envelope {
            body,
            redelivered: false,
        });
        queue.stats.published += 1;
        self.metrics
            .messages_published
            .with_label_values(&[queue_name])
            .inc();

        self.pump(queue_name, queue, owners, next_delivery_tag);
    }

    /// Register a consumer and start delivering to it
    pub fn add_consumer(
        &self,
        connection_id: ConnectionId,
        queue_name: &str,
        tag: &str,
        prefetch_count: u16,
        outbox: Outbox,
    ) -> ConsumerId {
        let mut state = self.state.lock();
        state.next_consumer_id += 1;
        let id = state.next_consumer_id;

        let State {
            queues,
            owners,
            next_delivery_tag,
            ..
        } = &mut *state;

        let queue = queues.entry(queue_name.to_string()).or_default();
        queue.consumers.push(Consumer {
            id,
            connection_id,
            tag: tag.to_string(),
            prefetch_count,
            unacked: BTreeMap::new(),
            outbox,
        });
        debug!(
            "Consumer {} ({}) subscribed to {} with prefetch {}",
            id, tag, queue_name, prefetch_count
        );

        self.pump(queue_name, queue, owners, next_delivery_tag);
        id
    }

    /// Acknowledge a delivery made to one of the connection's consumers.
    /// Returns false if the tag is unknown or belongs to another connection.
    pub fn ack(&self, connection_id: ConnectionId, delivery_tag: u64) -> bool {
        let mut state = self.state.lock();
        let State {
            queues,
            owners,
            next_delivery_tag,
            ..
        } = &mut *state;

        let Some((queue_name, consumer_id)) = owners.get(&delivery_tag).cloned() else {
            return false;
        };
        let Some(queue) = queues.get_mut(&queue_name) else {
            return false;
        };
        let Some(consumer) = queue
            .consumers
            .iter_mut()
            .find(|c| c.id == consumer_id && c.connection_id == connection_id)
        else {
            return false;
        };

        consumer.unacked.remove(&delivery_tag);
        owners.remove(&delivery_tag);
        queue.stats.acked += 1;
        self.metrics
            .messages_acked
            .with_label_values(&[queue_name.as_str()])
            .inc();

        self.pump(&queue_name, queue, owners, next_delivery_tag);
        true
    }

    /// Remove a consumer, requeueing whatever it had not acknowledged.
    /// Returns the number of requeued deliveries.
    pub fn remove_consumer(&self, queue_name: &str, consumer_id: ConsumerId) -> usize {
        let mut state = self.state.lock();
        let State {
            queues,
            owners,
            next_delivery_tag,
            ..
        } = &mut *state;

        let Some(queue) = queues.get_mut(queue_name) else {
            return 0;
        };
        let Some(index) = queue.consumers.iter().position(|c| c.id == consumer_id) else {
            return 0;
        };

        let consumer = queue.consumers.remove(index);
        let requeued = queue.requeue(consumer, owners);
        if requeued > 0 {
            self.metrics
                .messages_requeued
                .with_label_values(&[queue_name])
                .inc_by(requeued as u64);
        }

        self.pump(queue_name, queue, owners, next_delivery_tag);
        requeued
    }

    pub fn stats(&self, queue_name: &str) -> Option<QueueStats> {
        let state = self.state.lock();
        state.queues.get(queue_name).map(|queue| QueueStats {
            ready: queue.ready.len(),
            unacked: queue.unacked(),
            consumers: queue.consumers.len(),
            ..queue.stats
        })
    }

    /// Hand ready messages to consumers with spare prefetch capacity, round-robin
    fn pump(
        &self,
        queue_name: &str,
        queue: &mut Queue,
        owners: &mut HashMap<u64, (String, ConsumerId)>,
        next_delivery_tag: &mut u64,
    ) {
        while !queue.ready.is_empty() && !queue.consumers.is_empty() {
            let count = queue.consumers.len();
            let Some(index) = (0..count)
                .map(|offset| (queue.next_consumer + offset) % count)
                .find(|&i| queue.consumers[i].has_capacity())
            else {
                break;
            };
            queue.next_consumer = (index + 1) % count;

            let Some(envelope) = queue.ready.pop_front() else {
                break;
            };
            *next_delivery_tag += 1;
            let delivery_tag = *next_delivery_tag;

            let consumer = &mut queue.consumers[index];
            let message = Message::Deliver(DeliverMessage {
                consumer_tag: consumer.tag.clone(),
                delivery_tag,
                redelivered: envelope.redelivered,
                body: envelope.body.clone(),
            });

            if consumer.outbox.send(message).is_err() {
                warn!("Consumer {} connection is gone, dropping consumer", consumer.tag);
                queue.ready.push_front(envelope);
                let dead = queue.consumers.remove(index);
                let requeued = queue.requeue(dead, owners);
                self.metrics
                    .messages_requeued
                    .with_label_values(&[queue_name])
                    .inc_by(requeued as u64);
                queue.next_consumer = 0;
                continue;
            }

            consumer.unacked.insert(delivery_tag, envelope.body);
            let held = consumer.unacked.len();
            owners.insert(delivery_tag, (queue_name.to_string(), consumer.id));

            queue.stats.delivered += 1;
            queue.stats.max_unacked_per_consumer = queue.stats.max_unacked_per_consumer.max(held);
            self.metrics
                .messages_delivered
                .with_label_values(&[queue_name])
                .inc();
        }

        self.metrics.set_queue_depth(
            queue_name,
            queue.ready.len(),
            queue.unacked(),
            queue.consumers.len(),
        );
    }
}
