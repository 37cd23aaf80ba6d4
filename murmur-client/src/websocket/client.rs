use super::messages::WsMessage;
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::input::{AddMemberInput, CreateRoomInput, SendMessageInput, ValidateExt};
use crate::models::{ConversationKey, Message as ChatMessage, Role, Room, RoomMember};
use crate::store::ConversationStore;
use crate::subscription::{FeedEvent, Subscription, SubscriptionState};

/// Internal message type for the write channel
enum WriteMessage {
    Data(String),
    Close,
}

/// Client-side record of one live subscription
struct LocalSubscription {
    conversation: ConversationKey,
    state: SubscriptionState,
    /// Server-side id while bound on the current link
    server_id: Option<String>,
    /// A subscribe request is in flight
    activating: bool,
    events: mpsc::UnboundedSender<FeedEvent>,
}

impl LocalSubscription {
    fn set_state(&mut self, next: SubscriptionState) {
        if self.state.can_transition_to(next) {
            self.state = next;
            let _ = self.events.send(FeedEvent::State(next));
        }
    }
}

struct Inner {
    config: ClientConfig,
    user_id: String,
    write_tx: StdMutex<Option<mpsc::UnboundedSender<WriteMessage>>>,
    /// request_id -> waiting caller
    pending: StdMutex<HashMap<String, oneshot::Sender<WsMessage>>>,
    subscriptions: StdMutex<HashMap<u64, LocalSubscription>>,
    /// subscribe request_id -> local subscription id
    subscribe_requests: StdMutex<HashMap<String, u64>>,
    next_local_id: AtomicU64,
    connected: watch::Sender<bool>,
    started: AtomicBool,
    closed: AtomicBool,
    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unexpected(reply: WsMessage) -> ChatError {
    ChatError::Rejected {
        code: "bad_request".to_string(),
        message: format!("unexpected reply: {:?}", reply),
    }
}

/// WebSocket client for the Murmur server.
///
/// Owns one reconnecting connection. Subscriptions survive reconnects: they
/// are re-established on every new link and report the gap through their
/// state.
pub struct StoreClient {
    inner: Arc<Inner>,
}

impl StoreClient {
    pub fn new(config: ClientConfig, user_id: impl Into<String>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (connected, _) = watch::channel(false);

        info!(url = %config.server_url, "Using WebSocket server URL");

        Self {
            inner: Arc::new(Inner {
                config,
                user_id: user_id.into(),
                write_tx: StdMutex::new(None),
                pending: StdMutex::new(HashMap::new()),
                subscriptions: StdMutex::new(HashMap::new()),
                subscribe_requests: StdMutex::new(HashMap::new()),
                next_local_id: AtomicU64::new(1),
                connected,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn server_url(&self) -> &str {
        &self.inner.config.server_url
    }

    /// Check if connected and authenticated
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Start the connection loop. Calling it again is a no-op.
    pub fn connect(&self) -> Result<(), ChatError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ChatError::StoreUnavailable(
                "client has been disconnected".to_string(),
            ));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(run_connection(self.inner.clone(), shutdown_rx));
        Ok(())
    }

    /// Wait until the link is up and authenticated
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ChatError> {
        let mut rx = self.inner.connected.subscribe();
        let result = match tokio::time::timeout(timeout, rx.wait_for(|connected| *connected)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(ChatError::StoreUnavailable(
                "not connected to server".to_string(),
            )),
        };
        result
    }

    /// Gracefully disconnect from the server and close every subscription
    pub fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Initiating graceful disconnect");
        // Signal shutdown to stop reconnection loop
        let _ = self.inner.shutdown_tx.send(());
        // Also send close message through the channel if connected
        if let Some(tx) = lock(&self.inner.write_tx).as_ref() {
            let _ = tx.send(WriteMessage::Close);
        }
        self.inner.close_subscriptions();
    }

    pub async fn create_room(&self, name: &str) -> Result<Room, ChatError> {
        CreateRoomInput {
            name: name.to_string(),
        }
        .validate_input()?;
        let reply = self
            .inner
            .request(|request_id| WsMessage::CreateRoom {
                request_id,
                name: name.to_string(),
            })
            .await?;
        match reply {
            WsMessage::RoomCreated { room, .. } => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    /// Add a member to a room this user owns
    pub async fn add_member(
        &self,
        room_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), ChatError> {
        AddMemberInput {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        }
        .validate_input()?;
        let reply = self
            .inner
            .request(|request_id| WsMessage::AddMember {
                request_id,
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                role,
            })
            .await?;
        match reply {
            WsMessage::MemberAdded { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Rooms this user belongs to
    pub async fn rooms(&self) -> Result<Vec<Room>, ChatError> {
        let reply = self
            .inner
            .request(|request_id| WsMessage::ListRooms { request_id })
            .await?;
        match reply {
            WsMessage::Rooms { rooms, .. } => Ok(rooms),
            other => Err(unexpected(other)),
        }
    }

    /// Members of a room this user belongs to
    pub async fn members(&self, room_id: &str) -> Result<Vec<RoomMember>, ChatError> {
        let reply = self
            .inner
            .request(|request_id| WsMessage::ListMembers {
                request_id,
                room_id: room_id.to_string(),
            })
            .await?;
        match reply {
            WsMessage::Members { members, .. } => Ok(members),
            other => Err(unexpected(other)),
        }
    }
}

impl Drop for StoreClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl ConversationStore for StoreClient {
    fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    async fn append(
        &self,
        conversation: &ConversationKey,
        content: &str,
        client_msg_id: &str,
    ) -> Result<ChatMessage, ChatError> {
        SendMessageInput {
            content: content.to_string(),
        }
        .validate_input()?;
        let reply = self
            .inner
            .request(|request_id| WsMessage::Send {
                request_id,
                conversation: conversation.clone(),
                content: content.to_string(),
                client_msg_id: Some(client_msg_id.to_string()),
            })
            .await?;
        match reply {
            WsMessage::Ack { message, .. } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    async fn history(
        &self,
        conversation: &ConversationKey,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let reply = self
            .inner
            .request(|request_id| WsMessage::History {
                request_id,
                conversation: conversation.clone(),
                limit,
            })
            .await?;
        match reply {
            WsMessage::HistoryResult { messages, .. } => Ok(messages),
            other => Err(unexpected(other)),
        }
    }

    /// Register a subscription. While the link is down the handle starts in
    /// `Connecting` and becomes `Active` once the server accepts it.
    async fn subscribe(&self, conversation: &ConversationKey) -> Result<Subscription, ChatError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ChatError::SubscriptionDropped(
                "client has been disconnected".to_string(),
            ));
        }

        let local_id = self.inner.next_local_id.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscriptions).insert(
            local_id,
            LocalSubscription {
                conversation: conversation.clone(),
                state: SubscriptionState::Connecting,
                server_id: None,
                activating: false,
                events: events_tx,
            },
        );

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = Subscription::new(
            conversation.clone(),
            SubscriptionState::Connecting,
            events_rx,
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.release(local_id);
                }
            },
        );

        match self.inner.clone().activate(local_id).await {
            Ok(()) => Ok(handle),
            Err(e) if e.is_retryable() => {
                debug!(conversation = %conversation, error = %e, "Subscription waiting for connection");
                Ok(handle)
            }
            Err(e) => Err(e),
        }
    }
}

impl Inner {
    fn send_raw(&self, json: String) -> Result<(), ChatError> {
        let guard = lock(&self.write_tx);
        match guard.as_ref() {
            Some(tx) => tx
                .send(WriteMessage::Data(json))
                .map_err(|_| ChatError::StoreUnavailable("connection closed".to_string())),
            None => {
                warn!("Cannot send message: not connected to server");
                Err(ChatError::StoreUnavailable(
                    "not connected to server".to_string(),
                ))
            }
        }
    }

    async fn request(
        &self,
        make: impl FnOnce(String) -> WsMessage,
    ) -> Result<WsMessage, ChatError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = make(request_id.clone());
        self.call(request_id, frame).await
    }

    /// Send one request frame and wait for the reply carrying its id
    async fn call(&self, request_id: String, frame: WsMessage) -> Result<WsMessage, ChatError> {
        let json = serde_json::to_string(&frame)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), tx);

        if let Err(e) = self.send_raw(json) {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(WsMessage::Error { code, message, .. })) => {
                Err(ChatError::from_wire(&code, message))
            }
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChatError::StoreUnavailable(
                "connection lost before reply".to_string(),
            )),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                Err(ChatError::StoreUnavailable(format!(
                    "no reply within {} ms",
                    self.config.request_timeout.as_millis()
                )))
            }
        }
    }

    /// Ask the server for a subscription on behalf of a local one.
    /// Binding happens in the reader when `subscribed` arrives.
    async fn activate(self: Arc<Self>, local_id: u64) -> Result<(), ChatError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let conversation = {
            let mut subs = lock(&self.subscriptions);
            let sub = match subs.get_mut(&local_id) {
                Some(sub) => sub,
                None => return Ok(()),
            };
            if sub.server_id.is_some() || sub.activating {
                return Ok(());
            }
            sub.activating = true;
            sub.conversation.clone()
        };
        lock(&self.subscribe_requests).insert(request_id.clone(), local_id);

        let frame = WsMessage::Subscribe {
            request_id: request_id.clone(),
            conversation: conversation.clone(),
        };
        match self.call(request_id.clone(), frame).await {
            Ok(_) => Ok(()),
            Err(e) => {
                lock(&self.subscribe_requests).remove(&request_id);
                let mut subs = lock(&self.subscriptions);
                if e.is_retryable() {
                    if let Some(sub) = subs.get_mut(&local_id) {
                        if sub.server_id.is_none() {
                            sub.activating = false;
                        }
                    }
                } else if let Some(mut sub) = subs.remove(&local_id) {
                    warn!(conversation = %conversation, error = %e, "Subscription refused");
                    sub.set_state(SubscriptionState::Closed);
                }
                Err(e)
            }
        }
    }

    /// Re-establish every unbound subscription on a fresh link
    fn rebind_subscriptions(self: &Arc<Self>) {
        let ids: Vec<u64> = {
            let mut subs = lock(&self.subscriptions);
            for sub in subs.values_mut() {
                if sub.state == SubscriptionState::Disconnected {
                    sub.set_state(SubscriptionState::Reconnecting);
                }
            }
            subs.iter()
                .filter(|(_, sub)| sub.server_id.is_none() && !sub.activating)
                .map(|(id, _)| *id)
                .collect()
        };

        for local_id in ids {
            let inner = self.clone();
            tokio::spawn(async move {
                if let Err(e) = inner.activate(local_id).await {
                    warn!(local_id, error = %e, "Failed to re-subscribe");
                }
            });
        }
    }

    fn mark_reconnecting(&self) {
        let mut subs = lock(&self.subscriptions);
        for sub in subs.values_mut() {
            if sub.state == SubscriptionState::Disconnected {
                sub.set_state(SubscriptionState::Reconnecting);
            }
        }
    }

    fn on_link_lost(&self) {
        *lock(&self.write_tx) = None;
        self.connected.send_replace(false);
        lock(&self.subscribe_requests).clear();
        // Dropping the senders fails every waiting request
        lock(&self.pending).clear();

        let mut subs = lock(&self.subscriptions);
        for sub in subs.values_mut() {
            sub.server_id = None;
            sub.activating = false;
            if matches!(
                sub.state,
                SubscriptionState::Active | SubscriptionState::Reconnecting
            ) {
                sub.set_state(SubscriptionState::Disconnected);
            }
        }
    }

    fn close_subscriptions(&self) {
        let drained: Vec<LocalSubscription> = lock(&self.subscriptions)
            .drain()
            .map(|(_, s)| s)
            .collect();
        for mut sub in drained {
            if let Some(server_id) = sub.server_id.take() {
                self.send_unsubscribe(server_id);
            }
            sub.set_state(SubscriptionState::Closed);
        }
    }

    /// Forget a local subscription and release its server side, if any
    fn release(&self, local_id: u64) {
        let removed = lock(&self.subscriptions).remove(&local_id);
        if let Some(sub) = removed {
            debug!(conversation = %sub.conversation, "Unsubscribing");
            if let Some(server_id) = sub.server_id {
                self.send_unsubscribe(server_id);
            }
        }
    }

    /// Fire and forget; the server drops subscriptions with the connection anyway
    fn send_unsubscribe(&self, subscription_id: String) {
        let frame = WsMessage::Unsubscribe {
            request_id: uuid::Uuid::new_v4().to_string(),
            subscription_id,
        };
        if let Ok(json) = serde_json::to_string(&frame) {
            let _ = self.send_raw(json);
        }
    }

    fn handle_incoming(&self, text: &str) {
        let msg = match serde_json::from_str::<WsMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Failed to parse frame from server");
                return;
            }
        };

        let msg = match msg {
            WsMessage::Event {
                subscription_id,
                message,
            } => {
                self.route_event(&subscription_id, message);
                return;
            }
            other => other,
        };

        let request_id = match msg.reply_id() {
            Some(id) => id.to_string(),
            None => {
                warn!(frame = ?msg, "Server frame without request id");
                return;
            }
        };

        let subscribe_request = lock(&self.subscribe_requests).remove(&request_id);
        if let Some(local_id) = subscribe_request {
            self.finish_subscribe(local_id, &msg);
        }

        let waiter = lock(&self.pending).remove(&request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => debug!(request_id = %request_id, "Reply for unknown request"),
        }
    }

    /// Bind a local subscription to its server id as soon as the reply is read,
    /// so events that follow on the same link are never dropped.
    fn finish_subscribe(&self, local_id: u64, reply: &WsMessage) {
        let orphaned = {
            let mut subs = lock(&self.subscriptions);
            match (subs.get_mut(&local_id), reply) {
                (Some(sub), WsMessage::Subscribed { subscription_id, .. }) => {
                    sub.server_id = Some(subscription_id.clone());
                    sub.activating = false;
                    sub.set_state(SubscriptionState::Active);
                    info!(conversation = %sub.conversation, "Subscription active");
                    None
                }
                // Unsubscribed while the request was in flight
                (None, WsMessage::Subscribed { subscription_id, .. }) => {
                    Some(subscription_id.clone())
                }
                (Some(sub), _) => {
                    sub.activating = false;
                    None
                }
                (None, _) => None,
            }
        };
        if let Some(subscription_id) = orphaned {
            self.send_unsubscribe(subscription_id);
        }
    }

    fn route_event(&self, subscription_id: &str, message: ChatMessage) {
        let subs = lock(&self.subscriptions);
        let target = subs
            .values()
            .find(|sub| sub.server_id.as_deref() == Some(subscription_id));
        match target {
            Some(sub) => {
                let _ = sub.events.send(FeedEvent::Message(message));
            }
            None => debug!(subscription_id = %subscription_id, "Event for unknown subscription"),
        }
    }
}

/// Wait for the server's `auth_response`
async fn wait_for_auth<S>(read: &mut S, timeout: Duration) -> bool
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let frame = match tokio::time::timeout(timeout, read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => {
            warn!("Connection closed during auth");
            return false;
        }
        Err(_) => {
            warn!("Timed out waiting for auth response");
            return false;
        }
    };

    match serde_json::from_str::<WsMessage>(&frame) {
        Ok(WsMessage::AuthResponse { success: true, message }) => {
            info!("Authenticated with server: {}", message);
            true
        }
        Ok(WsMessage::AuthResponse { message, .. }) => {
            error!("Authentication failed: {}", message);
            false
        }
        _ => {
            warn!("Unexpected response during auth");
            false
        }
    }
}

/// Connect, authenticate, pump frames, and reconnect after the configured delay
async fn run_connection(inner: Arc<Inner>, mut shutdown_rx: broadcast::Receiver<()>) {
    let server_url = inner.config.server_url.clone();
    let reconnect_delay = inner.config.reconnect_delay;

    loop {
        // Check for shutdown before attempting connection
        if shutdown_rx.try_recv().is_ok() || inner.closed.load(Ordering::SeqCst) {
            info!("Shutdown signal received, stopping reconnection");
            break;
        }

        inner.mark_reconnecting();
        info!(url = %server_url, "Connecting to Murmur server");

        match connect_async(server_url.as_str()).await {
            Ok((ws_stream, _)) => {
                let (mut ws_write, mut ws_read) = ws_stream.split();

                // Send Connect message
                let connect_msg = WsMessage::Connect {
                    user_id: inner.user_id.clone(),
                    token: inner.config.access_token.clone(),
                };
                let authenticated = match serde_json::to_string(&connect_msg) {
                    Ok(json) => {
                        ws_write.send(Message::Text(json.into())).await.is_ok()
                            && wait_for_auth(&mut ws_read, inner.config.request_timeout).await
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize connect message");
                        false
                    }
                };

                if authenticated {
                    // Create channel for outgoing messages
                    let (tx, mut rx) = mpsc::unbounded_channel::<WriteMessage>();
                    *lock(&inner.write_tx) = Some(tx);
                    inner.connected.send_replace(true);
                    inner.rebind_subscriptions();

                    // Message loop
                    let mut should_reconnect = true;
                    loop {
                        tokio::select! {
                            // Check for shutdown signal
                            _ = shutdown_rx.recv() => {
                                info!("Shutdown signal received, closing connection gracefully");
                                if let Err(e) = ws_write.send(Message::Close(None)).await {
                                    warn!(error = %e, "Failed to send close frame");
                                }
                                should_reconnect = false;
                                break;
                            }
                            // Send outgoing messages
                            Some(msg) = rx.recv() => {
                                match msg {
                                    WriteMessage::Data(data) => {
                                        if ws_write.send(Message::Text(data.into())).await.is_err() {
                                            error!("Failed to send message to server");
                                            break;
                                        }
                                    }
                                    WriteMessage::Close => {
                                        info!("Close requested, sending close frame");
                                        if let Err(e) = ws_write.send(Message::Close(None)).await {
                                            warn!(error = %e, "Failed to send close frame");
                                        }
                                        should_reconnect = false;
                                        break;
                                    }
                                }
                            }
                            msg = ws_read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        inner.handle_incoming(&text);
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        info!("Server closed connection");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!(error = %e, "WebSocket error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }

                    // Cleanup
                    inner.on_link_lost();
                    info!("Disconnected from Murmur server");

                    if !should_reconnect {
                        break;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, url = %server_url, "Failed to connect to Murmur server");
            }
        }

        // Reconnect after delay
        debug!(delay_ms = reconnect_delay.as_millis() as u64, "Reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping reconnection");
                break;
            }
        }
    }

    inner.on_link_lost();
}
