use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::access::AuthorizationCheck;
use crate::messages::WsMessage;
use crate::models::{ConversationKey, Message};

/// One live subscription owned by one connection
struct Subscription {
    connection_id: String,
    user_id: String,
    conversation: ConversationKey,
    tx: mpsc::UnboundedSender<String>,
}

/// Live subscription feed: fans newly appended messages out to every
/// connection watching the conversation.
pub struct Feed {
    /// subscription_id -> subscription
    subscriptions: DashMap<String, Subscription>,
}

impl Feed {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
        }
    }

    /// Register a subscription. The caller is responsible for authorization.
    pub fn subscribe(
        &self,
        connection_id: &str,
        user_id: &str,
        conversation: ConversationKey,
        tx: mpsc::UnboundedSender<String>,
    ) -> String {
        let subscription_id = uuid::Uuid::new_v4().to_string();
        debug!(
            subscription_id = %subscription_id,
            user_id = %user_id,
            conversation = %conversation,
            "Subscription registered"
        );
        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                connection_id: connection_id.to_string(),
                user_id: user_id.to_string(),
                conversation,
                tx,
            },
        );
        subscription_id
    }

    /// Remove a subscription owned by `connection_id`.
    /// Unknown or foreign ids are ignored, so repeated calls are harmless.
    pub fn unsubscribe(&self, connection_id: &str, subscription_id: &str) -> bool {
        self.subscriptions
            .remove_if(subscription_id, |_, sub| sub.connection_id == connection_id)
            .is_some()
    }

    /// Drop every subscription of a closed connection
    pub fn drop_connection(&self, connection_id: &str) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|_, sub| sub.connection_id != connection_id);
        before.saturating_sub(self.subscriptions.len())
    }

    /// Deliver a freshly appended message to every matching, authorized
    /// subscriber (the sender included). Returns the number of deliveries.
    pub fn publish(&self, message: &Message, policy: &dyn AuthorizationCheck) -> usize {
        let targets: Vec<(String, String, mpsc::UnboundedSender<String>)> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().conversation == message.conversation)
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().user_id.clone(),
                    entry.value().tx.clone(),
                )
            })
            .collect();

        let mut decisions: HashMap<String, bool> = HashMap::new();
        let mut delivered = 0;

        for (subscription_id, user_id, tx) in targets {
            let allowed = match decisions.get(&user_id) {
                Some(allowed) => *allowed,
                None => {
                    let allowed = match policy.can_access(&user_id, &message.conversation) {
                        Ok(allowed) => allowed,
                        Err(e) => {
                            error!(user_id = %user_id, error = %e, "Authorization check failed");
                            false
                        }
                    };
                    decisions.insert(user_id.clone(), allowed);
                    allowed
                }
            };
            if !allowed {
                warn!(
                    subscription_id = %subscription_id,
                    user_id = %user_id,
                    "Skipping delivery to unauthorized subscriber"
                );
                continue;
            }

            let event = WsMessage::Event {
                subscription_id: subscription_id.clone(),
                message: message.clone(),
            };
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to serialize event");
                    continue;
                }
            };

            if tx.send(json).is_ok() {
                delivered += 1;
            } else {
                // Connection already gone
                self.subscriptions.remove(&subscription_id);
            }
        }

        debug!(message_id = %message.id, delivered, "Published message");
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn count_for_connection(&self, connection_id: &str) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().connection_id == connection_id)
            .count()
    }
}

impl Default for Feed {
    fn default() -> Self {
        Self::new()
    }
}
