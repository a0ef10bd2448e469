use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding messages with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload]
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need the length prefix and the message type
        if src.len() < 5 {
            return Ok(None);
        }

        // Read length prefix without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        // Check max message size
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }
        if length == 0 {
            return Err(ProtocolError::InvalidMessageType(0));
        }

        // Wait for the full frame
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        // Read message type
        let msg_type_byte = src.get_u8();
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;

        let payload = src.split_to(length - 1); // Length counts the type byte

        let message = match msg_type {
            MessageType::Qos => Message::Qos(bincode::deserialize(&payload)?),
            MessageType::Consume => Message::Consume(bincode::deserialize(&payload)?),
            MessageType::Publish => Message::Publish(bincode::deserialize(&payload)?),
            MessageType::Deliver => Message::Deliver(bincode::deserialize(&payload)?),
            MessageType::Ack => Message::Ack(bincode::deserialize(&payload)?),
            MessageType::Cancel => Message::Cancel(bincode::deserialize(&payload)?),
            MessageType::Ok => Message::Ok(bincode::deserialize(&payload)?),
            MessageType::Error => Message::Error(bincode::deserialize(&payload)?),
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        // Serialize the payload
        let payload = match &item {
            Message::Qos(req) => bincode::serialize(req)?,
            Message::Consume(req) => bincode::serialize(req)?,
            Message::Publish(req) => bincode::serialize(req)?,
            Message::Deliver(msg) => bincode::serialize(msg)?,
            Message::Ack(req) => bincode::serialize(req)?,
            Message::Cancel(req) => bincode::serialize(req)?,
            Message::Ok(resp) => bincode::serialize(resp)?,
            Message::Error(resp) => bincode::serialize(resp)?,
        };

        let total_length = 1 + payload.len(); // message type + payload
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(total_length));
        }

        // Write length prefix, message type and payload
        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}
