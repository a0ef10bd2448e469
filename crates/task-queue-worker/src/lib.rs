pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod finalizer;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use broker::{Acknowledger, Channel, Delivery, DeliveryStream, Publisher, QueuePublisher};
pub use client::BrokerClient;
pub use config::{AckMode, PacingConfig, PacingMode, WorkerConfig};
pub use consumer::{ConsumerLoop, DeliveryProcessor, ProcessOutcome};
pub use dispatcher::{Dispatcher, ExecutionOutcome};
pub use error::{BrokerError, DispatchError, HandlerError, RegistryError, Result, WorkerError};
pub use finalizer::{Branch, FinalizeReport, Finalizer};
pub use handler::{FnHandler, TaskHandler};
pub use registry::{HandlerRegistry, TaskRegistry};
pub use worker::Worker;
