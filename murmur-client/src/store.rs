use async_trait::async_trait;

use crate::error::ChatError;
use crate::models::{ConversationKey, Message};
use crate::subscription::Subscription;

/// The conversation operations a view needs from the backing store.
///
/// Implemented by [`StoreClient`](crate::StoreClient); tests substitute their
/// own implementations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Identity every write is attributed to
    fn user_id(&self) -> &str;

    /// Durably append one message. Re-sending the same `client_msg_id`
    /// returns the already stored row.
    async fn append(
        &self,
        conversation: &ConversationKey,
        content: &str,
        client_msg_id: &str,
    ) -> Result<Message, ChatError>;

    /// Messages in ascending order; with a limit, the most recent ones.
    async fn history(
        &self,
        conversation: &ConversationKey,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ChatError>;

    async fn subscribe(&self, conversation: &ConversationKey) -> Result<Subscription, ChatError>;
}
