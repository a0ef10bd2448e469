//! TCP client for the task queue broker.

use crate::broker::{Acknowledger, Channel, Delivery, DeliveryStream};
use crate::error::BrokerError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, SplitStream, StreamExt};
use futures::SinkExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use task_queue_protocol::{
    AckRequest, CancelRequest, ConsumeRequest, DeliverMessage, Message, MessageCodec,
    PublishRequest, QosRequest, RequestId,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<Result<(), BrokerError>>;

/// State shared between the client, its I/O tasks and outstanding deliveries
struct Inner {
    outbox: mpsc::UnboundedSender<Message>,
    pending: DashMap<RequestId, Reply>,
    consumers: DashMap<String, mpsc::UnboundedSender<Delivery>>,
    next_request_id: AtomicU64,
    closed: AtomicBool,
}

/// One connection to the broker, also used as its only channel
pub struct BrokerClient {
    inner: Arc<Inner>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl BrokerClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, BrokerError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("Connected to broker at {}", peer);
        }

        let (mut sink, frames) = Framed::new(stream, MessageCodec).split();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Message>();

        let inner = Arc::new(Inner {
            outbox,
            pending: DashMap::new(),
            consumers: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("Broker write failed: {}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn(read_loop(inner.clone(), frames));

        Ok(BrokerClient {
            inner,
            reader,
            writer,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(inner: Arc<Inner>, mut frames: SplitStream<Framed<TcpStream, MessageCodec>>) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Deliver(msg)) => inner.route_delivery(msg),
            Ok(Message::Ok(resp)) => inner.complete(resp.request_id, Ok(())),
            Ok(Message::Error(resp)) => {
                inner.complete(resp.request_id, Err(BrokerError::Rejected(resp.error)))
            }
            Ok(other) => warn!("Unexpected {:?} from broker", other.message_type()),
            Err(e) => {
                warn!("Broker connection error: {}", e);
                break;
            }
        }
    }

    debug!("Broker connection closed");
    inner.shut();
}

impl Inner {
    fn route_delivery(self: &Arc<Self>, msg: DeliverMessage) {
        let Some(consumer) = self.consumers.get(&msg.consumer_tag) else {
            debug!(
                "Dropping delivery {} for unknown consumer {}",
                msg.delivery_tag, msg.consumer_tag
            );
            return;
        };

        let acker: Arc<dyn Acknowledger> = self.clone();
        let delivery = Delivery::new(msg.delivery_tag, msg.redelivered, msg.body, acker);
        if consumer.send(delivery).is_err() {
            debug!("Consumer {} no longer receiving", msg.consumer_tag);
        }
    }

    fn complete(&self, request_id: RequestId, result: Result<(), BrokerError>) {
        match self.pending.remove(&request_id) {
            Some((_, reply)) => {
                let _ = reply.send(result);
            }
            None => debug!("Reply for unknown request {}", request_id),
        }
    }

    /// Mark closed, fail waiting requests and end every delivery stream
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let waiting: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for request_id in waiting {
            if let Some((_, reply)) = self.pending.remove(&request_id) {
                let _ = reply.send(Err(BrokerError::Closed));
            }
        }
        self.consumers.clear();
    }

    async fn request(&self, build: impl FnOnce(RequestId) -> Message) -> Result<(), BrokerError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.pending.insert(request_id, reply);

        // Re-checked after insert so a concurrent shut() cannot miss this request
        if self.closed.load(Ordering::SeqCst) || self.outbox.send(build(request_id)).is_err() {
            self.pending.remove(&request_id);
            return Err(BrokerError::Closed);
        }

        response.await.map_err(|_| BrokerError::Closed)?
    }
}

#[async_trait]
impl Acknowledger for Inner {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.outbox
            .send(Message::Ack(AckRequest { delivery_tag }))
            .map_err(|_| BrokerError::Closed)
    }
}

#[async_trait]
impl Channel for BrokerClient {
    async fn qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.inner
            .request(|request_id| {
                Message::Qos(QosRequest {
                    request_id,
                    prefetch_count,
                })
            })
            .await
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.consumers.contains_key(consumer_tag) {
            return Err(BrokerError::Rejected(format!(
                "Consumer tag {} already in use",
                consumer_tag
            )));
        }
        // Registered first so no delivery can arrive before its stream exists
        self.inner.consumers.insert(consumer_tag.to_string(), tx);

        let result = self
            .inner
            .request(|request_id| {
                Message::Consume(ConsumeRequest {
                    request_id,
                    queue: queue.to_string(),
                    consumer_tag: consumer_tag.to_string(),
                })
            })
            .await;
        if let Err(e) = result {
            self.inner.consumers.remove(consumer_tag);
            return Err(e);
        }

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(deliveries.boxed())
    }

    /// Deliveries already buffered for this consumer are dropped locally.
    /// The broker requeues everything unacked on cancel, flagged redelivered.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        if self.inner.consumers.remove(consumer_tag).is_some() {
            info!("Cancelling consumer {}, unacked deliveries return to the queue", consumer_tag);
        }
        self.inner
            .request(|request_id| {
                Message::Cancel(CancelRequest {
                    request_id,
                    consumer_tag: consumer_tag.to_string(),
                })
            })
            .await
    }

    async fn publish_to(&self, queue: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        self.inner
            .request(|request_id| {
                Message::Publish(PublishRequest {
                    request_id,
                    queue: queue.to_string(),
                    body,
                })
            })
            .await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Ok(());
        }

        let tags: Vec<String> = self
            .inner
            .consumers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for tag in tags {
            if let Err(e) = self.cancel(&tag).await {
                debug!("Cancel of {} during close failed: {}", tag, e);
            }
        }

        self.inner.shut();
        self.reader.abort();
        self.writer.abort();
        info!("Broker connection closed");
        Ok(())
    }
}
