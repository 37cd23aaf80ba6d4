use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};

use crate::access::AuthorizationCheck;
use crate::db::Database;
use crate::error::StoreError;
use crate::input::{AddMemberInput, AppendInput, CreateRoomInput, ValidateExt};
use crate::models::{ConversationKey, Message, Role, Room, RoomMember};
use crate::rooms;

/// Upper bound for a single history read
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Result of an append. `inserted` is false when the correlation id was
/// already stored for this sender and the existing row was returned.
#[derive(Debug, Clone)]
pub struct Appended {
    pub message: Message,
    pub inserted: bool,
}

/// Durable, append-only message log plus the room registry it depends on.
pub struct MessageStore {
    db: Arc<Database>,
    policy: Arc<dyn AuthorizationCheck>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>, policy: Arc<dyn AuthorizationCheck>) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &dyn AuthorizationCheck {
        self.policy.as_ref()
    }

    /// Validate, authorize and durably append one message.
    pub fn append(
        &self,
        conversation: &ConversationKey,
        sender_id: &str,
        content: &str,
        client_msg_id: Option<&str>,
    ) -> Result<Appended, StoreError> {
        AppendInput {
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            client_msg_id: client_msg_id.map(str::to_string),
        }
        .validate_input()?;

        let conversation = self.authorize(conversation, sender_id)?;

        let (room_id, receiver_id) = match &conversation {
            ConversationKey::Room { room_id } => (Some(room_id.as_str()), None),
            ConversationKey::Direct { .. } => (None, conversation.peer_of(sender_id)),
        };

        let conn = self.db.lock()?;

        if let Some(key) = client_msg_id {
            if let Some(existing) = find_by_client_msg_id(&conn, sender_id, key)? {
                // A correlation id names exactly one message
                if existing.conversation != conversation || existing.content != content {
                    return Err(StoreError::Validation(format!(
                        "client_msg_id {} already used for another message",
                        key
                    )));
                }
                debug!(
                    sender_id = %sender_id,
                    client_msg_id = %key,
                    message_id = %existing.id,
                    "Duplicate append, returning stored message"
                );
                return Ok(Appended {
                    message: existing,
                    inserted: false,
                });
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO messages (id, room_id, sender_id, receiver_id, content, created_at, client_msg_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, room_id, sender_id, receiver_id, content, now, client_msg_id],
        )?;

        info!(message_id = %id, conversation = %conversation, sender_id = %sender_id, "Appended message");

        Ok(Appended {
            message: Message {
                id,
                conversation,
                sender_id: sender_id.to_string(),
                content: content.to_string(),
                created_at: now,
                client_msg_id: client_msg_id.map(str::to_string),
            },
            inserted: true,
        })
    }

    /// Ordered history of a conversation as seen by `viewer_id`.
    ///
    /// With a limit, the most recent `limit` messages are returned, still in
    /// ascending order.
    pub fn history(
        &self,
        conversation: &ConversationKey,
        viewer_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        let conversation = self.authorize(conversation, viewer_id)?;
        let limit = limit
            .map(|l| l.clamp(1, MAX_HISTORY_LIMIT) as i64)
            .unwrap_or(-1);

        let conn = self.db.lock()?;
        let mut messages = match &conversation {
            ConversationKey::Room { room_id } => {
                let mut stmt = conn.prepare(
                    "SELECT id, sender_id, content, created_at, client_msg_id FROM messages
                     WHERE room_id = ?1
                     ORDER BY created_at DESC, seq DESC
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![room_id, limit], |row| row_to_message(row, &conversation))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            ConversationKey::Direct { a, b } => {
                let mut stmt = conn.prepare(
                    "SELECT id, sender_id, content, created_at, client_msg_id FROM messages
                     WHERE room_id IS NULL
                       AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
                     ORDER BY created_at DESC, seq DESC
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![a, b, limit], |row| row_to_message(row, &conversation))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        messages.reverse();
        Ok(messages)
    }

    pub fn create_room(&self, owner_id: &str, name: &str) -> Result<Room, StoreError> {
        CreateRoomInput {
            owner_id: owner_id.to_string(),
            name: name.to_string(),
        }
        .validate_input()?;
        let conn = self.db.lock()?;
        let room = rooms::create_room(&conn, owner_id, name)?;
        info!(room_id = %room.id, owner_id = %owner_id, "Created room");
        Ok(room)
    }

    pub fn add_member(
        &self,
        room_id: &str,
        actor_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), StoreError> {
        AddMemberInput {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        }
        .validate_input()?;
        let conn = self.db.lock()?;
        rooms::add_member(&conn, room_id, actor_id, user_id, role)?;
        info!(room_id = %room_id, user_id = %user_id, role = role.as_str(), "Added room member");
        Ok(())
    }

    pub fn room_exists(&self, room_id: &str) -> Result<bool, StoreError> {
        let conn = self.db.lock()?;
        rooms::room_exists(&conn, room_id)
    }

    /// Rooms the user belongs to
    pub fn rooms_for(&self, user_id: &str) -> Result<Vec<Room>, StoreError> {
        let conn = self.db.lock()?;
        rooms::list_rooms_for_user(&conn, user_id)
    }

    /// Members of a room; only visible to members.
    pub fn members(&self, room_id: &str, viewer_id: &str) -> Result<Vec<RoomMember>, StoreError> {
        self.authorize(&ConversationKey::room(room_id), viewer_id)?;
        let conn = self.db.lock()?;
        rooms::list_members(&conn, room_id)
    }

    /// Normalize the key, check it names something that exists and that the
    /// user may access it.
    fn authorize(
        &self,
        conversation: &ConversationKey,
        user_id: &str,
    ) -> Result<ConversationKey, StoreError> {
        let conversation = conversation.clone().normalized();
        match &conversation {
            ConversationKey::Direct { a, b } if a == b => {
                return Err(StoreError::Validation(
                    "direct conversation needs two distinct users".to_string(),
                ));
            }
            ConversationKey::Room { room_id } => {
                let conn = self.db.lock()?;
                if !rooms::room_exists(&conn, room_id)? {
                    return Err(StoreError::NotFound(format!("room {}", room_id)));
                }
            }
            ConversationKey::Direct { .. } => {}
        }
        if !self.policy.can_access(user_id, &conversation)? {
            return Err(StoreError::Forbidden(format!(
                "{} has no access to {}",
                user_id, conversation
            )));
        }
        Ok(conversation)
    }
}

fn find_by_client_msg_id(
    conn: &Connection,
    sender_id: &str,
    client_msg_id: &str,
) -> Result<Option<Message>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, room_id, receiver_id, content, created_at FROM messages
             WHERE sender_id = ?1 AND client_msg_id = ?2",
            [sender_id, client_msg_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(id, room_id, receiver_id, content, created_at)| {
        let conversation = match (room_id, receiver_id) {
            (Some(room_id), _) => ConversationKey::room(room_id),
            (None, receiver) => {
                ConversationKey::direct(sender_id, receiver.unwrap_or_default())
            }
        };
        Message {
            id,
            conversation,
            sender_id: sender_id.to_string(),
            content,
            created_at,
            client_msg_id: Some(client_msg_id.to_string()),
        }
    }))
}

fn row_to_message(row: &Row<'_>, conversation: &ConversationKey) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation: conversation.clone(),
        sender_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        client_msg_id: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::MembershipPolicy;

    fn store() -> MessageStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let policy = Arc::new(MembershipPolicy::new(db.clone()));
        MessageStore::new(db, policy)
    }

    #[test]
    fn test_room_history_scenario() {
        let store = store();
        let room = store.create_room("alice", "Maths").unwrap();
        let key = ConversationKey::room(&room.id);

        assert!(store.history(&key, "alice", None).unwrap().is_empty());

        let sent = store.append(&key, "alice", "Hello", None).unwrap();
        assert!(sent.inserted);

        let history = store.history(&key, "alice", None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello");
        assert_eq!(history[0].sender_id, "alice");
        assert_eq!(history[0].id, sent.message.id);
    }

    #[test]
    fn test_empty_content_creates_nothing() {
        let store = store();
        let key = ConversationKey::direct("alice", "bob");
        let err = store.append(&key, "alice", "", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = store.append(&key, "alice", "  \n ", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.history(&key, "alice", None).unwrap().is_empty());
    }

    #[test]
    fn test_direct_history_matches_both_orderings() {
        let store = store();
        store
            .append(&ConversationKey::direct("alice", "bob"), "alice", "hi bob", None)
            .unwrap();
        store
            .append(&ConversationKey::direct("bob", "alice"), "bob", "hi alice", None)
            .unwrap();
        store
            .append(&ConversationKey::direct("alice", "carol"), "alice", "hi carol", None)
            .unwrap();

        let from_alice = store
            .history(&ConversationKey::direct("alice", "bob"), "alice", None)
            .unwrap();
        let from_bob = store
            .history(&ConversationKey::direct("bob", "alice"), "bob", None)
            .unwrap();
        assert_eq!(from_alice, from_bob);
        let contents: Vec<_> = from_alice.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi bob", "hi alice"]);
    }

    #[test]
    fn test_history_is_ascending_and_limited_to_latest() {
        let store = store();
        let key = ConversationKey::direct("alice", "bob");
        for i in 0..5 {
            store.append(&key, "alice", &format!("m{}", i), None).unwrap();
        }
        let all = store.history(&key, "bob", None).unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let last_two = store.history(&key, "bob", Some(2)).unwrap();
        let contents: Vec<_> = last_two.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[test]
    fn test_outsiders_are_forbidden() {
        let store = store();
        let room = store.create_room("alice", "Private").unwrap();
        let room_key = ConversationKey::room(&room.id);
        let dm_key = ConversationKey::direct("alice", "bob");
        store.append(&room_key, "alice", "secret", None).unwrap();
        store.append(&dm_key, "alice", "psst", None).unwrap();

        assert!(matches!(
            store.history(&room_key, "mallory", None),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            store.history(&dm_key, "mallory", None),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            store.append(&room_key, "mallory", "let me in", None),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            store.append(&dm_key, "mallory", "hi", None),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn test_unknown_room_and_self_pair() {
        let store = store();
        assert!(matches!(
            store.append(&ConversationKey::room("nope"), "alice", "hi", None),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.append(&ConversationKey::direct("alice", "alice"), "alice", "hi", None),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_client_msg_id_makes_append_idempotent() {
        let store = store();
        let key = ConversationKey::direct("alice", "bob");
        let first = store.append(&key, "alice", "once", Some("c-1")).unwrap();
        let again = store.append(&key, "alice", "once", Some("c-1")).unwrap();
        assert!(first.inserted);
        assert!(!again.inserted);
        assert_eq!(first.message, again.message);
        assert_eq!(store.history(&key, "alice", None).unwrap().len(), 1);

        // Identical content with a different correlation id is a new message
        store.append(&key, "alice", "once", Some("c-2")).unwrap();
        assert_eq!(store.history(&key, "alice", None).unwrap().len(), 2);
    }

    #[test]
    fn test_reused_client_msg_id_elsewhere_is_rejected() {
        let store = store();
        let with_bob = ConversationKey::direct("alice", "bob");
        let with_carol = ConversationKey::direct("alice", "carol");
        store.append(&with_bob, "alice", "for bob", Some("c-1")).unwrap();

        let other_pair = store.append(&with_carol, "alice", "for bob", Some("c-1"));
        assert!(matches!(other_pair, Err(StoreError::Validation(_))));
        let other_text = store.append(&with_bob, "alice", "changed", Some("c-1"));
        assert!(matches!(other_text, Err(StoreError::Validation(_))));

        assert!(store.history(&with_carol, "alice", None).unwrap().is_empty());
        assert_eq!(store.history(&with_bob, "alice", None).unwrap().len(), 1);
    }

    #[test]
    fn test_members_visible_to_members() {
        let store = store();
        let room = store.create_room("alice", "Biology").unwrap();
        store.add_member(&room.id, "alice", "bob", Role::Member).unwrap();
        assert_eq!(store.members(&room.id, "bob").unwrap().len(), 2);
        assert!(store.members(&room.id, "carol").is_err());
    }
}
