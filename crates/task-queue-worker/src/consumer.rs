//! Consumer loop: drains one subscription and drives each delivery through
//! decode, dispatch and finalize.
//!
//! With the default [`AckMode::BeforeExecute`] a delivery is acknowledged the
//! moment it is received, so a crash while its handler runs loses the task.
//! [`AckMode::AfterFinalize`] acknowledges once follow-ups are published
//! instead, so a crash leads to redelivery and possibly a second execution.

use crate::broker::{Channel, Delivery, DeliveryStream};
use crate::config::{AckMode, PacingConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{BrokerError, DispatchError};
use crate::finalizer::{FinalizeReport, Finalizer};
use futures::StreamExt;
use std::sync::Arc;
use task_queue_core::TaskSignature;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What happened to a single delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Body was not a task signature; nothing dispatched
    Malformed,
    /// No handler for the task name; nothing dispatched
    NotRegistered,
    /// Handler ran and its follow-up chain was published
    Finalized(FinalizeReport),
}

/// Per-delivery pipeline shared by every processing slot
pub struct DeliveryProcessor {
    dispatcher: Dispatcher,
    finalizer: Finalizer,
    ack_mode: AckMode,
    pacing: PacingConfig,
}

impl DeliveryProcessor {
    pub fn new(
        dispatcher: Dispatcher,
        finalizer: Finalizer,
        ack_mode: AckMode,
        pacing: PacingConfig,
    ) -> Self {
        DeliveryProcessor {
            dispatcher,
            finalizer,
            ack_mode,
            pacing,
        }
    }

    #[instrument(
        skip_all,
        fields(delivery_tag = delivery.delivery_tag(), redelivered = delivery.redelivered())
    )]
    pub async fn process(&self, delivery: Delivery) -> ProcessOutcome {
        if self.ack_mode == AckMode::BeforeExecute {
            acknowledge(&delivery).await;
        }

        let outcome = self.execute(&delivery).await;

        if self.ack_mode == AckMode::AfterFinalize {
            acknowledge(&delivery).await;
        }
        outcome
    }

    async fn execute(&self, delivery: &Delivery) -> ProcessOutcome {
        let delay = self.pacing.delay_for(delivery.body());
        if !delay.is_zero() {
            debug!("Pacing delivery for {:?}", delay);
            tokio::time::sleep(delay).await;
        }

        let signature = match TaskSignature::from_slice(delivery.body()) {
            Ok(signature) => signature,
            Err(e) => {
                error!("Failed to decode task: {}", e);
                return ProcessOutcome::Malformed;
            }
        };

        match self.dispatcher.dispatch(&signature).await {
            Ok(outcome) => {
                ProcessOutcome::Finalized(self.finalizer.finalize(&signature, &outcome).await)
            }
            Err(e @ DispatchError::TaskNotRegistered(_)) => {
                warn!("{}", e);
                ProcessOutcome::NotRegistered
            }
        }
    }
}

async fn acknowledge(delivery: &Delivery) {
    if let Err(e) = delivery.ack().await {
        warn!("Failed to ack delivery {}: {}", delivery.delivery_tag(), e);
    }
}

/// Subscribes to one queue and processes its deliveries until shutdown
pub struct ConsumerLoop {
    processor: Arc<DeliveryProcessor>,
    queue: String,
    consumer_tag: String,
    prefetch_count: u16,
    concurrency: usize,
}

impl ConsumerLoop {
    pub fn new(
        processor: DeliveryProcessor,
        queue: impl Into<String>,
        consumer_tag: impl Into<String>,
        prefetch_count: u16,
        concurrency: usize,
    ) -> Self {
        ConsumerLoop {
            processor: Arc::new(processor),
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            prefetch_count,
            concurrency: concurrency.max(1),
        }
    }

    /// Run until `shutdown` fires or the subscription ends.
    ///
    /// Returns `Ok` on shutdown and [`BrokerError::Closed`] when the broker
    /// ends the subscription. Deliveries already being processed are
    /// completed before returning.
    pub async fn run(
        &self,
        channel: &dyn Channel,
        shutdown: CancellationToken,
    ) -> Result<(), BrokerError> {
        channel.qos(self.prefetch_count).await?;
        let mut deliveries = channel.consume(&self.queue, &self.consumer_tag).await?;
        info!(
            "Consuming from {} as {} (prefetch {}, concurrency {})",
            self.queue, self.consumer_tag, self.prefetch_count, self.concurrency
        );

        let result = if self.concurrency == 1 {
            self.run_sequential(&mut deliveries, &shutdown).await
        } else {
            self.run_concurrent(&mut deliveries, &shutdown).await
        };

        if result.is_ok() {
            if let Err(e) = channel.cancel(&self.consumer_tag).await {
                debug!("Failed to cancel consumer {}: {}", self.consumer_tag, e);
            }
        }
        result
    }

    async fn run_sequential(
        &self,
        deliveries: &mut DeliveryStream,
        shutdown: &CancellationToken,
    ) -> Result<(), BrokerError> {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, consumer {} stopping", self.consumer_tag);
                    return Ok(());
                }
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => return Err(closed(&self.consumer_tag)),
                },
            };

            self.processor.process(delivery).await;
        }
    }

    async fn run_concurrent(
        &self,
        deliveries: &mut DeliveryStream,
        shutdown: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        let result = loop {
            while let Some(finished) = tasks.try_join_next() {
                log_task_result(finished);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => break Err(closed(&self.consumer_tag)),
                },
            };

            let processor = self.processor.clone();
            tasks.spawn(async move {
                let _permit = permit;
                processor.process(delivery).await
            });
        };

        if result.is_ok() {
            info!("Shutdown requested, consumer {} stopping", self.consumer_tag);
        }
        if !tasks.is_empty() {
            info!("Waiting for {} in-flight deliveries", tasks.len());
        }
        while let Some(finished) = tasks.join_next().await {
            log_task_result(finished);
        }

        result
    }
}

fn closed(consumer_tag: &str) -> BrokerError {
    warn!("Delivery stream for {} ended", consumer_tag);
    BrokerError::Closed
}

fn log_task_result(result: Result<ProcessOutcome, tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Delivery processing task failed: {}", e);
    }
}
