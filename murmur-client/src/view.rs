//! Optimistic send pipeline for one open conversation.
//!
//! A [`ConversationView`] owns the transcript. Sends show up immediately as
//! pending entries; the durable write runs in the background and its outcome,
//! together with the live feed, settles each entry as confirmed or failed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::models::input::{SendMessageInput, ValidateExt};
use crate::models::{ConversationKey, Message};
use crate::store::ConversationStore;
use crate::subscription::{FeedEvent, Subscription, SubscriptionState};
use crate::transcript::{Entry, Merge, Transcript, DEFAULT_MATCH_WINDOW_MS};

const DEFAULT_APPEND_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    /// A send still unanswered after this long fails as unavailable
    pub append_timeout: Duration,
    /// History page size; `None` loads everything
    pub history_limit: Option<usize>,
    pub match_window_ms: i64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            append_timeout: Duration::from_millis(DEFAULT_APPEND_TIMEOUT_MS),
            history_limit: None,
            match_window_ms: DEFAULT_MATCH_WINDOW_MS,
        }
    }
}

/// Progress of the history load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
    /// Load failed; call [`ConversationView::load_history`] again
    Failed(ChatError),
}

/// Something the UI should react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// A row that was not in the transcript yet
    MessageArrived(Message),
    /// A pending send is now durable
    Confirmed { client_msg_id: String },
    /// A pending send failed and can be retried
    Failed { client_msg_id: String, error: ChatError },
    LinkChanged {
        state: SubscriptionState,
        error: Option<ChatError>,
    },
    HistoryReloaded { merged: usize },
    HistoryFailed(ChatError),
    /// The live feed is gone for good
    Closed,
}

struct SendOutcome {
    client_msg_id: String,
    result: Result<Message, ChatError>,
}

pub struct ConversationView {
    store: Arc<dyn ConversationStore>,
    conversation: ConversationKey,
    config: ViewConfig,
    transcript: Transcript,
    subscription: Option<Subscription>,
    link_state: SubscriptionState,
    load_state: LoadState,
    outcome_tx: mpsc::UnboundedSender<SendOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<SendOutcome>,
    in_flight: usize,
    queued: VecDeque<ViewEvent>,
    /// Set until a history reload after a link gap has completed
    reload_pending: bool,
}

impl ConversationView {
    /// Subscribe, then load history.
    ///
    /// Subscribing first means nothing written between the two calls is
    /// missed. A refused subscription is an error; a failed history load
    /// leaves the view open in [`LoadState::Failed`].
    pub async fn open(
        store: Arc<dyn ConversationStore>,
        conversation: ConversationKey,
        config: ViewConfig,
    ) -> Result<Self, ChatError> {
        let subscription = store.subscribe(&conversation).await?;
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let mut view = Self {
            link_state: subscription.state(),
            transcript: Transcript::with_match_window(config.match_window_ms),
            subscription: Some(subscription),
            load_state: LoadState::Loading,
            store,
            conversation,
            config,
            outcome_tx,
            outcome_rx,
            in_flight: 0,
            queued: VecDeque::new(),
            reload_pending: false,
        };

        if let Err(e) = view.load_history().await {
            warn!(conversation = %view.conversation, error = %e, "Initial history load failed");
        }
        info!(conversation = %view.conversation, entries = view.transcript.len(), "Conversation opened");
        Ok(view)
    }

    pub fn conversation(&self) -> &ConversationKey {
        &self.conversation
    }

    pub fn user_id(&self) -> &str {
        self.store.user_id()
    }

    pub fn entries(&self) -> &[Entry] {
        self.transcript.entries()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn link_state(&self) -> SubscriptionState {
        self.link_state
    }

    /// Validate, show locally, and start the durable write.
    /// Returns the correlation id of the new entry.
    pub fn send(&mut self, content: &str) -> Result<String, ChatError> {
        SendMessageInput {
            content: content.to_string(),
        }
        .validate_input()?;

        let now = chrono::Utc::now().timestamp_millis();
        let client_msg_id = self.transcript.push_pending(self.store.user_id(), content, now);
        debug!(client_msg_id = %client_msg_id, "Pending send");
        self.spawn_append(client_msg_id.clone(), content.to_string());
        Ok(client_msg_id)
    }

    /// Re-send a failed entry under its original correlation id
    pub fn retry(&mut self, client_msg_id: &str) -> Result<(), ChatError> {
        let content = self.transcript.retry(client_msg_id).ok_or_else(|| {
            ChatError::Validation(format!("no failed message {}", client_msg_id))
        })?;
        info!(client_msg_id = %client_msg_id, "Retrying send");
        self.spawn_append(client_msg_id.to_string(), content);
        Ok(())
    }

    /// Fetch history and merge it; rows already shown are skipped.
    pub async fn load_history(&mut self) -> Result<usize, ChatError> {
        self.load_state = LoadState::Loading;
        match self
            .store
            .history(&self.conversation, self.config.history_limit)
            .await
        {
            Ok(messages) => {
                let merged = self.transcript.merge_history(&messages);
                self.load_state = LoadState::Loaded;
                debug!(conversation = %self.conversation, fetched = messages.len(), merged, "History merged");
                Ok(merged)
            }
            Err(e) => {
                self.load_state = LoadState::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Wait for the next change. `None` once the feed is closed and no send
    /// is outstanding.
    ///
    /// Cancel safe: dropping the future loses no event, and a history reload
    /// that was interrupted starts over on the next call.
    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }
            if self.reload_pending {
                let event = match self.load_history().await {
                    Ok(merged) => ViewEvent::HistoryReloaded { merged },
                    Err(e) => ViewEvent::HistoryFailed(e),
                };
                self.reload_pending = false;
                return Some(event);
            }
            if self.subscription.is_none() && self.in_flight == 0 {
                return None;
            }

            tokio::select! {
                Some(outcome) = self.outcome_rx.recv() => {
                    if let Some(event) = self.apply_outcome(outcome) {
                        return Some(event);
                    }
                }
                event = next_feed(&mut self.subscription) => {
                    match event {
                        Some(FeedEvent::Message(message)) => {
                            if let Some(event) = self.apply_message(message) {
                                return Some(event);
                            }
                        }
                        Some(FeedEvent::State(state)) => self.apply_state(state),
                        None => {
                            self.subscription = None;
                            return Some(ViewEvent::Closed);
                        }
                    }
                }
            }
        }
    }

    /// Stop the live feed. Outstanding sends still report their outcome.
    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
            self.link_state = SubscriptionState::Closed;
            self.reload_pending = false;
            info!(conversation = %self.conversation, "Conversation closed");
        }
    }

    fn spawn_append(&mut self, client_msg_id: String, content: String) {
        let store = self.store.clone();
        let conversation = self.conversation.clone();
        let timeout = self.config.append_timeout;
        let tx = self.outcome_tx.clone();
        self.in_flight += 1;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(
                timeout,
                store.append(&conversation, &content, &client_msg_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ChatError::StoreUnavailable("append timed out".to_string())),
            };
            let _ = tx.send(SendOutcome {
                client_msg_id,
                result,
            });
        });
    }

    fn apply_outcome(&mut self, outcome: SendOutcome) -> Option<ViewEvent> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let SendOutcome {
            client_msg_id,
            result,
        } = outcome;

        match result {
            Ok(message) => match self.transcript.confirm(&client_msg_id, &message) {
                Merge::Reconciled { client_msg_id } => Some(ViewEvent::Confirmed { client_msg_id }),
                Merge::Inserted => Some(ViewEvent::MessageArrived(message)),
                // Feed got there first
                Merge::Duplicate => None,
            },
            Err(error) => {
                warn!(client_msg_id = %client_msg_id, error = %error, "Send failed");
                if self.transcript.fail(&client_msg_id, &error.to_string()) {
                    Some(ViewEvent::Failed {
                        client_msg_id,
                        error,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn apply_message(&mut self, message: Message) -> Option<ViewEvent> {
        match self.transcript.merge(&message) {
            Merge::Inserted => Some(ViewEvent::MessageArrived(message)),
            Merge::Reconciled { client_msg_id } => Some(ViewEvent::Confirmed { client_msg_id }),
            Merge::Duplicate => None,
        }
    }

    fn apply_state(&mut self, state: SubscriptionState) {
        let previous = self.link_state;
        self.link_state = state;

        if state == SubscriptionState::Closed {
            self.subscription = None;
            self.reload_pending = false;
            self.queued.push_back(ViewEvent::Closed);
            return;
        }

        let error = (state == SubscriptionState::Disconnected)
            .then(|| ChatError::SubscriptionDropped("live feed disconnected".to_string()));
        self.queued.push_back(ViewEvent::LinkChanged { state, error });

        // The feed does not replay what was missed while the link was down
        let gap = previous == SubscriptionState::Reconnecting
            || matches!(self.load_state, LoadState::Failed(_));
        if state == SubscriptionState::Active && gap {
            self.reload_pending = true;
        }
    }
}

async fn next_feed(subscription: &mut Option<Subscription>) -> Option<FeedEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for ConversationView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationView")
            .field("conversation", &self.conversation)
            .field("link_state", &self.link_state)
            .field("load_state", &self.load_state)
            .field("entries", &self.transcript.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
