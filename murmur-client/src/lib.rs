pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod subscription;
pub mod transcript;
pub mod view;
mod websocket;

pub use config::ClientConfig;
pub use error::ChatError;
pub use models::{ConversationKey, Message, Role, Room, RoomMember};
pub use store::ConversationStore;
pub use subscription::{FeedEvent, Subscription, SubscriptionState};
pub use transcript::{Entry, EntryStatus, Merge, Transcript};
pub use view::{ConversationView, LoadState, ViewConfig, ViewEvent};
pub use websocket::{StoreClient, WsMessage};
