use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::models::{Role, Room, RoomMember};

/// Create a room and register `owner_id` as its owner.
pub fn create_room(conn: &Connection, owner_id: &str, name: &str) -> Result<Room, StoreError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp_millis();
    let name = name.trim();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO rooms (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, name, owner_id, now],
    )?;
    tx.execute(
        "INSERT INTO room_members (room_id, user_id, role, joined_at) VALUES (?1, ?2, 'owner', ?3)",
        params![id, owner_id, now],
    )?;
    tx.commit()?;

    Ok(Room {
        id,
        name: name.to_string(),
        created_by: owner_id.to_string(),
        created_at: now,
    })
}

pub fn get_room(conn: &Connection, room_id: &str) -> Result<Option<Room>, StoreError> {
    let room = conn
        .query_row(
            "SELECT id, name, created_by, created_at FROM rooms WHERE id = ?1",
            [room_id],
            |row| {
                Ok(Room {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_by: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(room)
}

pub fn room_exists(conn: &Connection, room_id: &str) -> Result<bool, StoreError> {
    Ok(get_room(conn, room_id)?.is_some())
}

/// Role of `user_id` in the room, `None` when not a member.
pub fn role_of(conn: &Connection, room_id: &str, user_id: &str) -> Result<Option<Role>, StoreError> {
    let role: Option<String> = conn
        .query_row(
            "SELECT role FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            [room_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(role.as_deref().and_then(Role::parse))
}

pub fn is_member(conn: &Connection, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
    Ok(role_of(conn, room_id, user_id)?.is_some())
}

/// Add `user_id` to the room. Only owners may add members; re-adding is a no-op.
pub fn add_member(
    conn: &Connection,
    room_id: &str,
    actor_id: &str,
    user_id: &str,
    role: Role,
) -> Result<(), StoreError> {
    if !room_exists(conn, room_id)? {
        return Err(StoreError::NotFound(format!("room {}", room_id)));
    }
    if role_of(conn, room_id, actor_id)? != Some(Role::Owner) {
        return Err(StoreError::Forbidden(
            "only room owners can add members".to_string(),
        ));
    }
    conn.execute(
        "INSERT OR IGNORE INTO room_members (room_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![room_id, user_id, role.as_str(), chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

pub fn list_members(conn: &Connection, room_id: &str) -> Result<Vec<RoomMember>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT room_id, user_id, role, joined_at FROM room_members
         WHERE room_id = ?1 ORDER BY joined_at ASC, user_id ASC",
    )?;
    let members = stmt
        .query_map([room_id], |row| {
            let role: String = row.get(2)?;
            Ok(RoomMember {
                room_id: row.get(0)?,
                user_id: row.get(1)?,
                role: Role::parse(&role).unwrap_or(Role::Member),
                joined_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Rooms the user belongs to, oldest first.
pub fn list_rooms_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Room>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.name, r.created_by, r.created_at FROM rooms r
         JOIN room_members m ON m.room_id = r.id
         WHERE m.user_id = ?1 ORDER BY r.created_at ASC",
    )?;
    let rooms = stmt
        .query_map([user_id], |row| {
            Ok(Room {
                id: row.get(0)?,
                name: row.get(1)?,
                created_by: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rooms)
}
