use crate::config::BrokerConfig;
use crate::metrics::BrokerMetrics;
use crate::queue::{ConnectionId, ConsumerId, Outbox, QueueManager, QueueStats};
use task_queue_protocol::{
    CancelRequest, ConsumeRequest, ErrorResponse, Message, MessageCodec, OkResponse,
    ProtocolError, PublishRequest, QosRequest, RequestId,
};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-connection consumer bookkeeping
struct Session {
    connection_id: ConnectionId,
    prefetch_count: u16,
    consumers: Vec<(String, String, ConsumerId)>,
}

/// Reference message broker server
pub struct Broker {
    config: Arc<BrokerConfig>,
    queues: Arc<QueueManager>,
    metrics: Arc<BrokerMetrics>,
    next_connection_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(BrokerMetrics::new()?);
        let queues = Arc::new(QueueManager::new(metrics.clone()));

        Ok(Broker {
            config: Arc::new(config),
            queues,
            metrics,
            next_connection_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(&addr).await?;
        info!("Broker listening on {}", addr);

        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            let broker = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = broker.handle_connection(stream).await {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a client connection
    async fn handle_connection(&self, stream: TcpStream) -> Result<(), ProtocolError> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.connections.inc();

        let (mut sink, mut frames) = Framed::new(stream, MessageCodec).split();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Message>();

        // Single writer for replies and deliveries
        let writer = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("Connection {} write failed: {}", connection_id, e);
                    break;
                }
            }
        });

        let mut session = Session {
            connection_id,
            prefetch_count: 0,
            consumers: Vec::new(),
        };

        let result = loop {
            tokio::select! {
                frame = frames.next() => {
                    match frame {
                        Some(Ok(message)) => self.handle_message(&mut session, message, &outbox),
                        Some(Err(e)) => break Err(e),
                        None => break Ok(()),
                    }
                }
                _ = self.shutdown.cancelled() => break Ok(()),
            }
        };

        for (queue, tag, consumer_id) in session.consumers.drain(..) {
            let requeued = self.queues.remove_consumer(&queue, consumer_id);
            if requeued > 0 {
                info!(
                    "Connection {} closed, requeued {} unacked deliveries from {} on {}",
                    connection_id, requeued, tag, queue
                );
            }
        }
        writer.abort();
        self.metrics.connections.dec();
        debug!("Connection {} closed", connection_id);

        result
    }

    fn handle_message(&self, session: &mut Session, message: Message, outbox: &Outbox) {
        match message {
            Message::Qos(req) => self.handle_qos(session, req, outbox),
            Message::Consume(req) => self.handle_consume(session, req, outbox),
            Message::Publish(req) => self.handle_publish(req, outbox),
            Message::Cancel(req) => self.handle_cancel(session, req, outbox),
            Message::Ack(req) => {
                if !self.queues.ack(session.connection_id, req.delivery_tag) {
                    warn!(
                        "Connection {} acked unknown delivery tag {}",
                        session.connection_id, req.delivery_tag
                    );
                }
            }
            other => {
                warn!("Unexpected {:?} from client", other.message_type());
                if let Some(request_id) = other.request_id() {
                    reply_error(outbox, request_id, "Unsupported message type");
                }
            }
        }
    }

    fn handle_qos(&self, session: &mut Session, req: QosRequest, outbox: &Outbox) {
        session.prefetch_count = req.prefetch_count;
        debug!(
            "Connection {} prefetch set to {}",
            session.connection_id, req.prefetch_count
        );
        reply_ok(outbox, req.request_id);
    }

    fn handle_consume(&self, session: &mut Session, req: ConsumeRequest, outbox: &Outbox) {
        if req.queue.is_empty() {
            reply_error(outbox, req.request_id, "Queue name must not be empty");
            return;
        }
        if session.consumers.iter().any(|(_, tag, _)| *tag == req.consumer_tag) {
            reply_error(
                outbox,
                req.request_id,
                &format!("Consumer tag {} already in use", req.consumer_tag),
            );
            return;
        }

        // Confirm before the first delivery goes out
        reply_ok(outbox, req.request_id);

        let consumer_id = self.queues.add_consumer(
            session.connection_id,
            &req.queue,
            &req.consumer_tag,
            session.prefetch_count,
            outbox.clone(),
        );
        info!(
            "Consumer {} subscribed to {} (prefetch {})",
            req.consumer_tag, req.queue, session.prefetch_count
        );
        session
            .consumers
            .push((req.queue, req.consumer_tag, consumer_id));
    }

    fn handle_publish(&self, req: PublishRequest, outbox: &Outbox) {
        if req.queue.is_empty() {
            reply_error(outbox, req.request_id, "Queue name must not be empty");
            return;
        }

        self.queues.publish(&req.queue, req.body);
        reply_ok(outbox, req.request_id);
    }

    fn handle_cancel(&self, session: &mut Session, req: CancelRequest, outbox: &Outbox) {
        let Some(index) = session
            .consumers
            .iter()
            .position(|(_, tag, _)| *tag == req.consumer_tag)
        else {
            reply_error(
                outbox,
                req.request_id,
                &format!("Unknown consumer tag {}", req.consumer_tag),
            );
            return;
        };

        let (queue, tag, consumer_id) = session.consumers.remove(index);
        let requeued = self.queues.remove_consumer(&queue, consumer_id);
        info!("Consumer {} cancelled on {} ({} requeued)", tag, queue, requeued);
        reply_ok(outbox, req.request_id);
    }

    pub fn queue_stats(&self, queue: &str) -> Option<QueueStats> {
        self.queues.stats(queue)
    }

    pub fn queues(&self) -> Arc<QueueManager> {
        self.queues.clone()
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Shutdown the broker
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn reply_ok(outbox: &Outbox, request_id: RequestId) {
    let _ = outbox.send(Message::Ok(OkResponse { request_id }));
}

fn reply_error(outbox: &Outbox, request_id: RequestId, error: &str) {
    let _ = outbox.send(Message::Error(ErrorResponse {
        request_id,
        error: error.to_string(),
    }));
}
