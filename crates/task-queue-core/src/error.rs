use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Malformed task payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode task signature: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
