//! Codec for encoding/decoding protocol messages to/from frames
//!
//! Two interchangeable wire encodings, selected once at server start:
//!
//! - **Textual**: one frame carries one self-describing JSON object whose
//!   `type` field is the discriminator.
//! - **Binary**: every logical message is two frames. The first carries
//!   only the [`MessageType`] discriminator; the second carries the
//!   payload, deserialized under the variant the discriminator dictates.
//!   The decoder keeps the per-connection discriminator that is still
//!   waiting for its payload frame.

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use crate::error::{ChatError, Result};
use crate::protocol::frame::encode_frame;
use crate::protocol::messages::{
    ClientRequest, CsChat, CsCreateRoom, CsJoinRoom, CsName, MessageType, ServerReply,
};

/// Wire encoding selected at server start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Textual,
    Binary,
}

impl WireFormat {
    /// Build the codec for this format
    pub fn codec(self) -> Box<dyn MessageCodec> {
        match self {
            WireFormat::Textual => Box::new(TextualCodec),
            WireFormat::Binary => Box::new(BinaryCodec::new()),
        }
    }
}

impl Default for WireFormat {
    fn default() -> Self {
        WireFormat::Textual
    }
}

impl FromStr for WireFormat {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "textual" => Ok(WireFormat::Textual),
            "binary" => Ok(WireFormat::Binary),
            other => Err(ChatError::config(format!("unknown format: {}", other))),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Textual => write!(f, "textual"),
            WireFormat::Binary => write!(f, "binary"),
        }
    }
}

/// Codec capability shared by both encodings
///
/// `decode` consumes one frame payload at a time; in binary mode a `Type`
/// header frame yields `None` and arms the decoder for the payload frame
/// that must follow. `encode` appends one logical reply as complete wire
/// bytes (one frame textual, two frames binary).
pub trait MessageCodec: Send + Sync {
    /// Decode one frame payload into a request, or None if the frame only
    /// advanced the decoder state
    fn decode(&mut self, payload: &[u8]) -> Result<Option<ClientRequest>>;

    /// Append one reply, fully framed, to `out`
    fn encode(&self, reply: &ServerReply, out: &mut BytesMut) -> Result<()>;

    /// Encode a reply list into a single wire blob
    fn encode_replies(&self, replies: &[ServerReply]) -> Result<Bytes> {
        let mut out = BytesMut::new();
        for reply in replies {
            self.encode(reply, &mut out)?;
        }
        Ok(out.freeze())
    }
}

/// Self-describing JSON encoding: one frame per message
pub struct TextualCodec;

impl MessageCodec for TextualCodec {
    fn decode(&mut self, payload: &[u8]) -> Result<Option<ClientRequest>> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        if value.get("type").is_none() {
            return Err(ChatError::protocol("message is missing a 'type' field"));
        }
        let request = serde_json::from_value(value)
            .map_err(|e| ChatError::protocol(format!("unknown message type: {}", e)))?;
        Ok(Some(request))
    }

    fn encode(&self, reply: &ServerReply, out: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(reply)?;
        encode_frame(&body, out)?;
        Ok(())
    }
}

/// Two-frame binary encoding: a `Type` frame followed by a payload frame
pub struct BinaryCodec {
    /// Discriminator received but still waiting for its payload frame
    pending: Option<MessageType>,
}

impl BinaryCodec {
    pub fn new() -> Self {
        Self { pending: None }
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec for BinaryCodec {
    fn decode(&mut self, payload: &[u8]) -> Result<Option<ClientRequest>> {
        let message_type = match self.pending.take() {
            None => {
                let message_type: MessageType = bincode::deserialize(payload)?;
                if !message_type.is_request() {
                    return Err(ChatError::protocol(format!(
                        "unexpected {:?} header from client",
                        message_type
                    )));
                }
                self.pending = Some(message_type);
                return Ok(None);
            }
            Some(message_type) => message_type,
        };

        let request = match message_type {
            MessageType::CsName => {
                let body: CsName = bincode::deserialize(payload)?;
                ClientRequest::Name(body)
            }
            MessageType::CsRooms => ClientRequest::Rooms,
            MessageType::CsCreateRoom => {
                let body: CsCreateRoom = bincode::deserialize(payload)?;
                ClientRequest::CreateRoom(body)
            }
            MessageType::CsJoinRoom => {
                let body: CsJoinRoom = bincode::deserialize(payload)?;
                ClientRequest::JoinRoom(body)
            }
            MessageType::CsLeaveRoom => ClientRequest::LeaveRoom,
            MessageType::CsChat => {
                let body: CsChat = bincode::deserialize(payload)?;
                ClientRequest::Chat(body)
            }
            MessageType::CsShutdown => ClientRequest::Shutdown,
            other => {
                return Err(ChatError::protocol(format!(
                    "unexpected {:?} header from client",
                    other
                )));
            }
        };

        Ok(Some(request))
    }

    fn encode(&self, reply: &ServerReply, out: &mut BytesMut) -> Result<()> {
        let header = bincode::serialize(&reply.message_type())?;
        encode_frame(&header, out)?;

        let body = match reply {
            ServerReply::SystemMessage(m) => bincode::serialize(m)?,
            ServerReply::RoomsResult(m) => bincode::serialize(m)?,
            ServerReply::Chat(m) => bincode::serialize(m)?,
        };
        encode_frame(&body, out)?;
        Ok(())
    }
}
