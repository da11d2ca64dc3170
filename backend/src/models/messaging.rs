//! Chat rooms, members, messages and real-time events.

use serde::{Deserialize, Serialize};

/// Kind of chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Group,
    Direct,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Group => "group",
            RoomType::Direct => "direct",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "group" => Some(RoomType::Group),
            "direct" => Some(RoomType::Direct),
            _ => None,
        }
    }
}

/// Role of a member inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Moderator,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Moderator => "moderator",
            MemberRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(MemberRole::Admin),
            "moderator" => Some(MemberRole::Moderator),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }

    /// Admins and moderators may delete other members' messages.
    pub fn can_moderate(&self) -> bool {
        matches!(self, MemberRole::Admin | MemberRole::Moderator)
    }
}

/// Kind of message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "file" => Some(MessageType::File),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_room_id: i64,
    pub sender_id: Option<i64>,
    pub sender_nom: Option<String>,
    pub sender_prenom: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<i64>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A chat room with per-user summary fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub quartier_id: i64,
    pub room_type: RoomType,
    pub created_by: Option<i64>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub member_count: i64,
    pub unread_count: i64,
    pub last_message: Option<Message>,
}

/// A member of a chat room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoomMember {
    pub chat_room_id: i64,
    pub user_id: i64,
    pub nom: String,
    pub prenom: String,
    pub role: MemberRole,
    pub joined_at: String,
    pub last_read_at: String,
    pub is_muted: bool,
}

/// Request body for `POST /api/messaging/rooms`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub room_type: Option<RoomType>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

/// Request body for posting a message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
}

/// Request body for editing a message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditMessageRequest {
    #[serde(default)]
    pub content: String,
}

/// Pagination and time window for message history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

/// Unread message count of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCount {
    pub unread_count: i64,
}

/// A user with at least one open real-time connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: i64,
    pub nom: String,
    pub prenom: String,
}

/// Event pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    MessageReceived { message: Message },
    MessageUpdated { message: Message },
    MessageDeleted { message_id: i64, chat_room_id: i64 },
}

impl HubEvent {
    /// Room the event belongs to.
    pub fn room_id(&self) -> i64 {
        match self {
            HubEvent::MessageReceived { message } | HubEvent::MessageUpdated { message } => {
                message.chat_room_id
            }
            HubEvent::MessageDeleted { chat_room_id, .. } => *chat_room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_event_wire_format() {
        let event = HubEvent::MessageDeleted {
            message_id: 7,
            chat_room_id: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_deleted");
        assert_eq!(json["message_id"], 7);
        assert_eq!(event.room_id(), 3);
    }

    #[test]
    fn test_moderation_roles() {
        assert!(MemberRole::Admin.can_moderate());
        assert!(MemberRole::Moderator.can_moderate());
        assert!(!MemberRole::Member.can_moderate());
    }
}
