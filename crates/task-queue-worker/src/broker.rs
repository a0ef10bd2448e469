//! Broker boundary consumed by the worker.
//!
//! The consumer loop only sees these traits; [`crate::client::BrokerClient`]
//! implements them over TCP, tests implement them in memory.

use crate::error::BrokerError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use task_queue_core::TaskSignature;

/// Lazy, non-restartable sequence of deliveries. Ends when the subscription does.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Acknowledges deliveries on behalf of the channel that received them
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;
}

/// Enqueues follow-up tasks
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, task: &TaskSignature) -> Result<(), BrokerError>;
}

/// An open channel to the broker
#[async_trait]
pub trait Channel: Send + Sync {
    /// Bound the number of unacknowledged deliveries for consumers created afterwards
    async fn qos(&self, prefetch_count: u16) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn publish_to(&self, queue: &str, body: Vec<u8>) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// One broker-provided message instance
pub struct Delivery {
    delivery_tag: u64,
    redelivered: bool,
    body: Bytes,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        body: impl Into<Bytes>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Delivery {
            delivery_tag,
            redelivered,
            body: body.into(),
            acker,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack(self.delivery_tag).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Publishes task signatures to a fixed queue on a channel
pub struct QueuePublisher {
    channel: Arc<dyn Channel>,
    queue: String,
}

impl QueuePublisher {
    pub fn new(channel: Arc<dyn Channel>, queue: impl Into<String>) -> Self {
        QueuePublisher {
            channel,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl Publisher for QueuePublisher {
    async fn publish(&self, task: &TaskSignature) -> Result<(), BrokerError> {
        let body = task.to_vec()?;
        self.channel.publish_to(&self.queue, body).await
    }
}
