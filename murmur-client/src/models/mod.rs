mod conversation;
pub mod input;
mod message;
mod room;

pub use conversation::ConversationKey;
pub use message::Message;
pub use room::{Role, Room, RoomMember};
