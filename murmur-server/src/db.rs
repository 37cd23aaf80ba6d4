use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

/// Shared SQLite handle. All store operations go through [`Database::lock`].
pub struct Database(Mutex<Connection>);

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self(Mutex::new(conn)))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.0
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("database lock poisoned: {}", e)))
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        -- Rooms (explicitly created, never deleted)
        CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Room membership
        CREATE TABLE IF NOT EXISTS room_members (
            room_id TEXT NOT NULL REFERENCES rooms(id),
            user_id TEXT NOT NULL,
            role TEXT CHECK(role IN ('owner', 'member')) NOT NULL DEFAULT 'member',
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (room_id, user_id)
        );

        -- Append-only message log. Room messages carry room_id, direct
        -- messages carry receiver_id; seq is the authoritative insertion order.
        CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            room_id TEXT REFERENCES rooms(id),
            sender_id TEXT NOT NULL,
            receiver_id TEXT,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            CHECK ((room_id IS NULL) <> (receiver_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_room_members_user_id ON room_members(user_id);
        ",
    )?;

    // Migration: correlation ids for optimistic sends
    if !has_column(conn, "messages", "client_msg_id") {
        conn.execute("ALTER TABLE messages ADD COLUMN client_msg_id TEXT", [])?;
    }
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client_msg_id
         ON messages(sender_id, client_msg_id) WHERE client_msg_id IS NOT NULL",
        [],
    )?;

    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
