use std::sync::Arc;

use crate::db::Database;
use crate::error::StoreError;
use crate::models::ConversationKey;
use crate::rooms;

/// Decides whether a user may read from and write to a conversation.
///
/// Consulted by the store before every append and history read, and by the
/// feed before every subscription and every delivery.
pub trait AuthorizationCheck: Send + Sync {
    fn can_access(&self, user_id: &str, conversation: &ConversationKey) -> Result<bool, StoreError>;
}

/// Room members see their rooms; the two participants see their direct pair.
pub struct MembershipPolicy {
    db: Arc<Database>,
}

impl MembershipPolicy {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl AuthorizationCheck for MembershipPolicy {
    fn can_access(&self, user_id: &str, conversation: &ConversationKey) -> Result<bool, StoreError> {
        match conversation {
            ConversationKey::Direct { .. } => Ok(conversation.is_direct_with(user_id)),
            ConversationKey::Room { room_id } => {
                let conn = self.db.lock()?;
                rooms::is_member(&conn, room_id, user_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_direct_pair_participants_only() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let policy = MembershipPolicy::new(db);
        let key = ConversationKey::direct("alice", "bob");
        assert!(policy.can_access("alice", &key).unwrap());
        assert!(policy.can_access("bob", &key).unwrap());
        assert!(!policy.can_access("mallory", &key).unwrap());
    }

    #[test]
    fn test_room_members_only() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = {
            let conn = db.lock().unwrap();
            let room = rooms::create_room(&conn, "alice", "Chemistry").unwrap();
            rooms::add_member(&conn, &room.id, "alice", "bob", Role::Member).unwrap();
            room
        };
        let policy = MembershipPolicy::new(db);
        let key = ConversationKey::room(room.id);
        assert!(policy.can_access("alice", &key).unwrap());
        assert!(policy.can_access("bob", &key).unwrap());
        assert!(!policy.can_access("mallory", &key).unwrap());
        assert!(!policy
            .can_access("alice", &ConversationKey::room("missing"))
            .unwrap());
    }
}
