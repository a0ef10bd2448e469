use task_queue_core::TaskError;
use task_queue_protocol::ProtocolError;
use thiserror::Error;

/// Failure at the broker boundary: connecting, subscribing, acknowledging or publishing
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Broker rejected request: {0}")]
    Rejected(String),

    #[error("Broker connection closed")]
    Closed,

    #[error(transparent)]
    Encode(#[from] TaskError),
}

/// Error returned by a task handler; routes the task to its `OnError` chain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Task name must not be empty")]
    EmptyName,

    #[error("Task '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Task with a name '{0}' not registered")]
    TaskNotRegistered(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Connection(#[from] BrokerError),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to initialise logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
