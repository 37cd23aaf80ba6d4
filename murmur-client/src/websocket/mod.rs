mod client;
mod messages;

pub use client::StoreClient;
pub use messages::WsMessage;
