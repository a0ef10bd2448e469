use serde::{Deserialize, Serialize};

/// Correlates a request with its `Ok`/`Error` reply
pub type RequestId = u64;

/// Message types for the broker protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Qos = 1,
    Consume = 2,
    Publish = 3,
    Deliver = 4,
    Ack = 5,
    Cancel = 6,
    Ok = 7,
    Error = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Qos),
            2 => Some(MessageType::Consume),
            3 => Some(MessageType::Publish),
            4 => Some(MessageType::Deliver),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Cancel),
            7 => Some(MessageType::Ok),
            8 => Some(MessageType::Error),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Set the prefetch bound for consumers created afterwards on this connection
    Qos(QosRequest),

    /// Subscribe to a queue
    Consume(ConsumeRequest),

    /// Enqueue a message body on a queue
    Publish(PublishRequest),

    /// Broker pushes a message to a consumer
    Deliver(DeliverMessage),

    /// Consumer acknowledges a delivery (no reply)
    Ack(AckRequest),

    /// Stop a consumer
    Cancel(CancelRequest),

    Ok(OkResponse),

    Error(ErrorResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Qos(_) => MessageType::Qos,
            Message::Consume(_) => MessageType::Consume,
            Message::Publish(_) => MessageType::Publish,
            Message::Deliver(_) => MessageType::Deliver,
            Message::Ack(_) => MessageType::Ack,
            Message::Cancel(_) => MessageType::Cancel,
            Message::Ok(_) => MessageType::Ok,
            Message::Error(_) => MessageType::Error,
        }
    }

    /// Request id for messages that expect or carry a reply
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Message::Qos(req) => Some(req.request_id),
            Message::Consume(req) => Some(req.request_id),
            Message::Publish(req) => Some(req.request_id),
            Message::Cancel(req) => Some(req.request_id),
            Message::Ok(resp) => Some(resp.request_id),
            Message::Error(resp) => Some(resp.request_id),
            Message::Deliver(_) | Message::Ack(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QosRequest {
    pub request_id: RequestId,
    /// Maximum unacknowledged deliveries per consumer, 0 = unlimited
    pub prefetch_count: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub request_id: RequestId,
    pub queue: String,
    pub consumer_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub request_id: RequestId,
    pub queue: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverMessage {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckRequest {
    pub delivery_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub request_id: RequestId,
    pub consumer_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OkResponse {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: RequestId,
    pub error: String,
}
