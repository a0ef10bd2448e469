mod message;
mod codec;

pub use message::{
    AckRequest, CancelRequest, ConsumeRequest, DeliverMessage, ErrorResponse, Message,
    MessageType, OkResponse, PublishRequest, QosRequest, RequestId,
};
pub use codec::MessageCodec;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum frame size: 11MB (10MB task body plus envelope overhead)
pub const MAX_MESSAGE_SIZE: usize = 11 * 1024 * 1024;
