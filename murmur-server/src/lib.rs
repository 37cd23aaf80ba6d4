//! Murmur conversation server library
//!
//! Durable message store, room registry and live subscription feed, served
//! over WebSocket. Exposed as a library for the binary and integration tests.

pub mod access;
pub mod config;
mod connection;
pub mod db;
pub mod error;
pub mod feed;
pub mod input;
pub mod messages;
pub mod models;
pub mod rooms;
mod state;
pub mod store;

pub use access::{AuthorizationCheck, MembershipPolicy};
pub use config::ServerConfig;
pub use connection::{handle_connection, handle_message, Session};
pub use db::Database;
pub use error::StoreError;
pub use messages::WsMessage;
pub use models::{ConversationKey, Message, Role, Room, RoomMember};
pub use state::ServerState;
pub use store::{Appended, MessageStore, MAX_HISTORY_LIMIT};
