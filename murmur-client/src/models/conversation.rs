use serde::{Deserialize, Serialize};

/// A room, or the unordered pair of two users
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

    /// Direct pair key; `direct(x, y) == direct(y, x)`
    pub fn direct(x: impl Into<String>, y: impl Into<String>) -> Self {
        let (x, y) = (x.into(), y.into());
        if x <= y {
            ConversationKey::Direct { a: x, b: y }
        } else {
            ConversationKey::Direct { a: y, b: x }
        }
    }

    /// Pick the conversation for `user_id` from an optional room and peer.
    /// Blank values count as unset; a room wins over a peer, and a peer
    /// equal to `user_id` yields nothing.
    pub fn choose(user_id: &str, room: Option<&str>, peer: Option<&str>) -> Option<Self> {
        let room = room.map(str::trim).filter(|r| !r.is_empty());
        let peer = peer.map(str::trim).filter(|p| !p.is_empty());
        match (room, peer) {
            (Some(room), _) => Some(ConversationKey::room(room)),
            (None, Some(peer)) if peer != user_id => {
                Some(ConversationKey::direct(user_id, peer))
            }
            _ => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ConversationKey::Direct { .. })
    }

    /// Short label for display
    pub fn label_for(&self, user_id: &str) -> String {
        match self {
            ConversationKey::Room { room_id } => format!("#{}", room_id),
            ConversationKey::Direct { a, b } if a == user_id => format!("@{}", b),
            ConversationKey::Direct { a, .. } => format!("@{}", a),
        }
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
