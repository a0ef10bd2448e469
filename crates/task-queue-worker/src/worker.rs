use crate::broker::{Channel, QueuePublisher};
use crate::client::BrokerClient;
use crate::config::WorkerConfig;
use crate::consumer::{ConsumerLoop, DeliveryProcessor};
use crate::dispatcher::Dispatcher;
use crate::error::{BrokerError, Result};
use crate::finalizer::Finalizer;
use crate::registry::TaskRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Worker process: one broker connection, one consumer loop
pub struct Worker {
    config: WorkerConfig,
    registry: Arc<dyn TaskRegistry>,
    consumer_tag: String,
}

impl Worker {
    pub fn new(config: WorkerConfig, registry: impl TaskRegistry + 'static) -> Result<Self> {
        config.validate()?;
        let consumer_tag = config.consumer_tag();

        Ok(Worker {
            config,
            registry: Arc::new(registry),
            consumer_tag,
        })
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Connect to the configured broker and consume until shutdown or disconnect
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Connecting to broker at {}", self.config.broker.address);
        let client = BrokerClient::connect(self.config.broker.address.as_str()).await?;
        self.run_on(Arc::new(client), shutdown).await
    }

    /// Consume on an already open channel. The channel is closed before returning.
    pub async fn run_on(
        &self,
        channel: Arc<dyn Channel>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let settings = &self.config.worker;
        let publisher = Arc::new(QueuePublisher::new(channel.clone(), settings.queue.clone()));
        let processor = DeliveryProcessor::new(
            Dispatcher::new(self.registry.clone()),
            Finalizer::new(publisher),
            settings.ack_mode,
            settings.pacing,
        );
        let consumer = ConsumerLoop::new(
            processor,
            settings.queue.clone(),
            self.consumer_tag.clone(),
            settings.prefetch_count,
            settings.concurrency,
        );

        info!(
            "Worker {} starting (ack mode {:?}, pacing {:?})",
            self.consumer_tag, settings.ack_mode, settings.pacing.mode
        );
        let result = consumer.run(channel.as_ref(), shutdown).await;

        if let Err(e) = channel.close().await {
            warn!("Failed to close broker channel: {}", e);
        }

        match result {
            Ok(()) => {
                info!("Worker {} stopped", self.consumer_tag);
                Ok(())
            }
            Err(e @ BrokerError::Closed) => {
                warn!("Worker {} lost its broker connection", self.consumer_tag);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
