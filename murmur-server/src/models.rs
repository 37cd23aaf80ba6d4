use serde::{Deserialize, Serialize};

/// Identity of a conversation: a room, or the unordered pair of two users.
///
/// Build direct keys with [`ConversationKey::direct`] so that both orderings of
/// the pair produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKey {
    Room { room_id: String },
    Direct { a: String, b: String },
}

impl ConversationKey {
    pub fn room(room_id: impl Into<String>) -> Self {
        ConversationKey::Room {
            room_id: room_id.into(),
        }
    }

    pub fn direct(x: impl Into<String>, y: impl Into<String>) -> Self {
        let (x, y) = (x.into(), y.into());
        if x <= y {
            ConversationKey::Direct { a: x, b: y }
        } else {
            ConversationKey::Direct { a: y, b: x }
        }
    }

    /// Re-order a direct key received from the wire.
    pub fn normalized(self) -> Self {
        match self {
            ConversationKey::Direct { a, b } => ConversationKey::direct(a, b),
            room => room,
        }
    }

    /// For a direct pair, the participant that is not `user_id`.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        match self {
            ConversationKey::Direct { a, b } if a == user_id => Some(b),
            ConversationKey::Direct { a, b } if b == user_id => Some(a),
            _ => None,
        }
    }

    pub fn is_direct_with(&self, user_id: &str) -> bool {
        self.peer_of(user_id).is_some()
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationKey::Room { room_id } => write!(f, "room:{}", room_id),
            ConversationKey::Direct { a, b } => write!(f, "dm:{}:{}", a, b),
        }
    }
}

/// A durable message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation: ConversationKey,
    pub sender_id: String,
    pub content: String,
    /// Milliseconds since the Unix epoch, assigned by the store.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Role::Owner),
            "member" => Some(Role::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub room_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_key_is_unordered() {
        assert_eq!(
            ConversationKey::direct("alice", "bob"),
            ConversationKey::direct("bob", "alice")
        );
        assert_ne!(
            ConversationKey::direct("alice", "bob"),
            ConversationKey::direct("alice", "carol")
        );
    }

    #[test]
    fn test_wire_key_is_normalized() {
        let raw: ConversationKey =
            serde_json::from_str(r#"{"kind":"direct","a":"zed","b":"amy"}"#).unwrap();
        assert_eq!(raw.normalized(), ConversationKey::direct("amy", "zed"));
    }

    #[test]
    fn test_peer_of() {
        let key = ConversationKey::direct("alice", "bob");
        assert_eq!(key.peer_of("alice"), Some("bob"));
        assert_eq!(key.peer_of("bob"), Some("alice"));
        assert_eq!(key.peer_of("carol"), None);
        assert_eq!(ConversationKey::room("r1").peer_of("alice"), None);
    }

    #[test]
    fn test_room_key_serialization() {
        let json = serde_json::to_string(&ConversationKey::room("r1")).unwrap();
        assert!(json.contains("\"kind\":\"room\""));
        assert!(json.contains("\"room_id\":\"r1\""));
    }
}
