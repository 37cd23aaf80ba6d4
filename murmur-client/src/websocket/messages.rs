use serde::{Deserialize, Serialize};

use crate::models::{ConversationKey, Message, Role, Room, RoomMember};

/// Frames exchanged with the Murmur server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "connect")]
    Connect {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    #[serde(rename = "auth_response")]
    AuthResponse { success: bool, message: String },
    #[serde(rename = "subscribe")]
    Subscribe {
        request_id: String,
        conversation: ConversationKey,
    },
    #[serde(rename = "subscribed")]
    Subscribed {
        request_id: String,
        subscription_id: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        request_id: String,
        subscription_id: String,
    },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { request_id: String },
    #[serde(rename = "send")]
    Send {
        request_id: String,
        conversation: ConversationKey,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    #[serde(rename = "ack")]
    Ack { request_id: String, message: Message },
    #[serde(rename = "history")]
    History {
        request_id: String,
        conversation: ConversationKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    #[serde(rename = "history_result")]
    HistoryResult {
        request_id: String,
        messages: Vec<Message>,
    },
    #[serde(rename = "create_room")]
    CreateRoom { request_id: String, name: String },
    #[serde(rename = "room_created")]
    RoomCreated { request_id: String, room: Room },
    #[serde(rename = "add_member")]
    AddMember {
        request_id: String,
        room_id: String,
        user_id: String,
        #[serde(default)]
        role: Role,
    },
    #[serde(rename = "member_added")]
    MemberAdded {
        request_id: String,
        room_id: String,
        user_id: String,
    },
    #[serde(rename = "list_rooms")]
    ListRooms { request_id: String },
    #[serde(rename = "rooms")]
    Rooms { request_id: String, rooms: Vec<Room> },
    #[serde(rename = "list_members")]
    ListMembers { request_id: String, room_id: String },
    #[serde(rename = "members")]
    Members {
        request_id: String,
        room_id: String,
        members: Vec<RoomMember>,
    },
    #[serde(rename = "event")]
    Event {
        subscription_id: String,
        message: Message,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: String,
        message: String,
    },
}

impl WsMessage {
    /// Request id carried by a reply, if any
    pub fn reply_id(&self) -> Option<&str> {
        match self {
            WsMessage::Subscribed { request_id, .. }
            | WsMessage::Unsubscribed { request_id }
            | WsMessage::Ack { request_id, .. }
            | WsMessage::HistoryResult { request_id, .. }
            | WsMessage::RoomCreated { request_id, .. }
            | WsMessage::MemberAdded { request_id, .. }
            | WsMessage::Rooms { request_id, .. }
            | WsMessage::Members { request_id, .. } => Some(request_id.as_str()),
            WsMessage::Error { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}
