use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{ConversationKey, Message};

/// Link state of one live subscription.
///
/// `Connecting -> Active -> (Disconnected -> Reconnecting -> Active)* -> Closed`.
/// A link that drops again before the server re-accepts the subscription
/// falls back from `Reconnecting` to `Disconnected`. Any state may close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Active,
    Disconnected,
    Reconnecting,
    Closed,
}

impl SubscriptionState {
    pub fn can_transition_to(self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Active, Disconnected)
                | (Disconnected, Reconnecting)
                | (Reconnecting, Active)
                | (Reconnecting, Disconnected)
                | (Connecting | Active | Disconnected | Reconnecting, Closed)
        )
    }

    pub fn is_live(self) -> bool {
        self == SubscriptionState::Active
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubscriptionState::Connecting => "connecting",
            SubscriptionState::Active => "active",
            SubscriptionState::Disconnected => "disconnected",
            SubscriptionState::Reconnecting => "reconnecting",
            SubscriptionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What a subscription yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Message(Message),
    State(SubscriptionState),
}

type Closer = Box<dyn FnOnce() + Send>;

/// Handle to a live subscription.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    conversation: ConversationKey,
    state: SubscriptionState,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    closer: Option<Closer>,
}

impl Subscription {
    /// `closer` runs exactly once, on the first unsubscribe or on drop.
    pub fn new(
        conversation: ConversationKey,
        initial: SubscriptionState,
        events: mpsc::UnboundedReceiver<FeedEvent>,
        closer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            conversation,
            state: initial,
            events,
            closer: Some(Box::new(closer)),
        }
    }

    pub fn conversation(&self) -> &ConversationKey {
        &self.conversation
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Next message or state change; `None` once closed.
    ///
    /// State changes that the state machine does not allow are dropped.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        loop {
            if self.state == SubscriptionState::Closed {
                return None;
            }
            let event = match self.events.recv().await {
                Some(event) => event,
                None => {
                    // Feed side went away
                    self.state = SubscriptionState::Closed;
                    return Some(FeedEvent::State(SubscriptionState::Closed));
                }
            };
            match event {
                FeedEvent::State(next) if next == self.state => continue,
                FeedEvent::State(next) if !self.state.can_transition_to(next) => {
                    warn!(from = %self.state, to = %next, "Ignoring invalid subscription transition");
                    continue;
                }
                FeedEvent::State(next) => {
                    debug!(conversation = %self.conversation, from = %self.state, to = %next, "Subscription state");
                    self.state = next;
                    return Some(FeedEvent::State(next));
                }
                message => return Some(message),
            }
        }
    }

    /// Stop delivery. Safe to call any number of times, in any state.
    pub fn unsubscribe(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
        self.events.close();
        self.state = SubscriptionState::Closed;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("conversation", &self.conversation)
            .field("state", &self.state)
            .finish()
    }
}
