//! Protocol message types for the chat system
//!
//! Ten message variants: seven client→server requests and three
//! server→client replies. On the textual wire each message is a
//! self-describing object whose `type` field carries the discriminator;
//! on the binary wire the discriminator travels as a separate `Type`
//! frame ahead of the payload frame.

use serde::{Deserialize, Serialize};

/// Unique identifier types
pub type RoomId = u64;
pub type ClientId = u64;

/// Room id of a client that is in no room
pub const LOBBY: RoomId = 0;

/// Message discriminator
///
/// Dispatch key for request handling, and the payload of the leading
/// `Type` frame in the binary encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    CsName,
    CsRooms,
    CsCreateRoom,
    CsJoinRoom,
    CsLeaveRoom,
    CsChat,
    CsShutdown,
    ScSystemMessage,
    ScRoomsResult,
    ScChat,
}

impl MessageType {
    /// True for client→server discriminators
    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::CsName
                | MessageType::CsRooms
                | MessageType::CsCreateRoom
                | MessageType::CsJoinRoom
                | MessageType::CsLeaveRoom
                | MessageType::CsChat
                | MessageType::CsShutdown
        )
    }
}

// =============================================================================
// Client -> Server payloads
// =============================================================================

/// Set the client's display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsName {
    pub name: String,
}

/// Create a room with the given title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsCreateRoom {
    pub title: String,
}

/// Join an existing room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsJoinRoom {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
}

/// Send a chat line to the current room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsChat {
    pub text: String,
}

// =============================================================================
// Server -> Client payloads
// =============================================================================

/// Free-form notice from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScSystemMessage {
    pub text: String,
}

/// One room entry in a rooms listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub title: String,
    /// Display names of the current members
    pub members: Vec<String>,
}

/// Listing of every open room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScRoomsResult {
    pub rooms: Vec<RoomInfo>,
}

/// A chat line relayed to room members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScChat {
    pub member: String,
    pub text: String,
}

// =============================================================================
// Tagged message enums
// =============================================================================

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "CSName")]
    Name(CsName),
    #[serde(rename = "CSRooms")]
    Rooms,
    #[serde(rename = "CSCreateRoom")]
    CreateRoom(CsCreateRoom),
    #[serde(rename = "CSJoinRoom")]
    JoinRoom(CsJoinRoom),
    #[serde(rename = "CSLeaveRoom")]
    LeaveRoom,
    #[serde(rename = "CSChat")]
    Chat(CsChat),
    #[serde(rename = "CSShutdown")]
    Shutdown,
}

impl ClientRequest {
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientRequest::Name(_) => MessageType::CsName,
            ClientRequest::Rooms => MessageType::CsRooms,
            ClientRequest::CreateRoom(_) => MessageType::CsCreateRoom,
            ClientRequest::JoinRoom(_) => MessageType::CsJoinRoom,
            ClientRequest::LeaveRoom => MessageType::CsLeaveRoom,
            ClientRequest::Chat(_) => MessageType::CsChat,
            ClientRequest::Shutdown => MessageType::CsShutdown,
        }
    }
}

/// A reply from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerReply {
    #[serde(rename = "SCSystemMessage")]
    SystemMessage(ScSystemMessage),
    #[serde(rename = "SCRoomsResult")]
    RoomsResult(ScRoomsResult),
    #[serde(rename = "SCChat")]
    Chat(ScChat),
}

impl ServerReply {
    /// Shorthand for the common system-message reply
    pub fn system<T: Into<String>>(text: T) -> Self {
        ServerReply::SystemMessage(ScSystemMessage { text: text.into() })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ServerReply::SystemMessage(_) => MessageType::ScSystemMessage,
            ServerReply::RoomsResult(_) => MessageType::ScRoomsResult,
            ServerReply::Chat(_) => MessageType::ScChat,
        }
    }
}
