use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::access::{AuthorizationCheck, MembershipPolicy};
use crate::db::Database;
use crate::error::StoreError;
use crate::feed::Feed;
use crate::models::{ConversationKey, Message};
use crate::store::MessageStore;

/// Server state shared by every connection
pub struct ServerState {
    pub store: MessageStore,
    pub feed: Feed,
    policy: Arc<dyn AuthorizationCheck>,
    /// When set, `connect` frames must carry this token
    access_token: Option<String>,
}

impl ServerState {
    pub fn new(db: Database) -> Self {
        let db = Arc::new(db);
        let policy: Arc<dyn AuthorizationCheck> = Arc::new(MembershipPolicy::new(db.clone()));
        Self::with_policy(db, policy)
    }

    /// Build state around a custom authorization capability
    pub fn with_policy(db: Arc<Database>, policy: Arc<dyn AuthorizationCheck>) -> Self {
        Self {
            store: MessageStore::new(db, policy.clone()),
            feed: Feed::new(),
            policy,
            access_token: None,
        }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Durably append and, on a fresh insert, fan the row out to subscribers.
    /// A replayed correlation id returns the stored row without a second fan-out.
    pub fn send(
        &self,
        conversation: &ConversationKey,
        sender_id: &str,
        content: &str,
        client_msg_id: Option<&str>,
    ) -> Result<Message, StoreError> {
        let appended = self
            .store
            .append(conversation, sender_id, content, client_msg_id)?;
        if appended.inserted {
            self.feed.publish(&appended.message, self.policy.as_ref());
        }
        Ok(appended.message)
    }

    /// Authorize and register a live subscription for `user_id`
    pub fn subscribe(
        &self,
        connection_id: &str,
        user_id: &str,
        conversation: &ConversationKey,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, StoreError> {
        let conversation = conversation.clone().normalized();
        if let ConversationKey::Direct { a, b } = &conversation {
            if a == b {
                return Err(StoreError::Validation(
                    "direct conversation needs two distinct users".to_string(),
                ));
            }
        }
        if let ConversationKey::Room { room_id } = &conversation {
            if !self.store.room_exists(room_id)? {
                return Err(StoreError::NotFound(format!("room {}", room_id)));
            }
        }
        if !self.policy.can_access(user_id, &conversation)? {
            debug!(user_id = %user_id, conversation = %conversation, "Subscription refused");
            return Err(StoreError::Forbidden(format!(
                "{} has no access to {}",
                user_id, conversation
            )));
        }
        Ok(self.feed.subscribe(connection_id, user_id, conversation, tx))
    }

    pub fn unsubscribe(&self, connection_id: &str, subscription_id: &str) -> bool {
        self.feed.unsubscribe(connection_id, subscription_id)
    }

    /// Release everything a closed connection held
    pub fn disconnect(&self, connection_id: &str) -> usize {
        self.feed.drop_connection(connection_id)
    }
}
