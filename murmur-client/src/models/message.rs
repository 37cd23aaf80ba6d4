use serde::{Deserialize, Serialize};

use super::conversation::ConversationKey;

/// A durable message as returned by the store
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub conversation: ConversationKey,
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
}
