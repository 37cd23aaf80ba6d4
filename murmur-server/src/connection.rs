use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::messages::WsMessage;
use crate::state::ServerState;

/// Seconds a new connection has to send its `connect` frame
const AUTH_TIMEOUT_SECS: u64 = 10;

/// An authenticated connection as seen by request handlers
pub struct Session {
    pub connection_id: String,
    pub user_id: String,
    pub tx: mpsc::UnboundedSender<String>,
}

impl Session {
    fn reply(&self, msg: &WsMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => error!(user_id = %self.user_id, error = %e, "Failed to serialize reply"),
        }
    }

    fn reply_error(&self, request_id: &str, err: &StoreError) {
        self.reply(&WsMessage::error(
            Some(request_id.to_string()),
            err.code(),
            err.to_string(),
        ));
    }
}

enum Handshake {
    Accepted(String),
    Rejected(String),
    Closed,
}

/// Handle a single WebSocket connection
pub async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Wait for Connect message to authenticate
    let user_id = match wait_for_connect(&mut ws_receiver, state.access_token()).await {
        Handshake::Accepted(id) => id,
        Handshake::Rejected(reason) => {
            let response = WsMessage::AuthResponse {
                success: false,
                message: reason,
            };
            if let Ok(json) = serde_json::to_string(&response) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
        Handshake::Closed => {
            warn!("Connection closed before authentication");
            return;
        }
    };

    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(user_id = %user_id, connection_id = %connection_id, "User connected");

    // Create channel for sending frames to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let session = Session {
        connection_id: connection_id.clone(),
        user_id: user_id.clone(),
        tx,
    };

    session.reply(&WsMessage::AuthResponse {
        success: true,
        message: "Connected to server".to_string(),
    });

    // Spawn task to forward frames from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, &session, &state);
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(user_id = %user_id, "Client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(user_id = %user_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        info!(user_id = %user_id, "WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut send_task => {
                info!(user_id = %user_id, "Send task finished (likely connection lost)");
                break;
            }
        }
    }

    // Cleanup
    send_task.abort();
    let dropped = state.disconnect(&connection_id);
    info!(
        user_id = %user_id,
        connection_id = %connection_id,
        dropped_subscriptions = dropped,
        "User disconnected"
    );
}

/// Wait for the Connect frame from a new connection
async fn wait_for_connect(
    receiver: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    expected_token: Option<&str>,
) -> Handshake {
    let timeout = tokio::time::timeout(std::time::Duration::from_secs(AUTH_TIMEOUT_SECS), async {
        while let Some(result) = receiver.next().await {
            let text = match result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => return Handshake::Closed,
                Ok(_) => continue,
            };
            match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::Connect { user_id, token }) => {
                    if user_id.trim().is_empty() {
                        return Handshake::Rejected("user_id must not be empty".to_string());
                    }
                    if let Some(expected) = expected_token {
                        match token.as_deref() {
                            Some(received) if received == expected => {}
                            Some(_) => {
                                warn!(user_id = %user_id, "Authentication failed: invalid token");
                                return Handshake::Rejected("Invalid token".to_string());
                            }
                            None => {
                                warn!(user_id = %user_id, "Authentication failed: no token provided");
                                return Handshake::Rejected("Token required".to_string());
                            }
                        }
                    }
                    return Handshake::Accepted(user_id);
                }
                Ok(other) => {
                    debug!(frame = ?other, "Ignoring frame before connect");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse Connect message");
                }
            }
        }
        Handshake::Closed
    });

    match timeout.await {
        Ok(result) => result,
        Err(_) => {
            warn!("Authentication timeout");
            Handshake::Closed
        }
    }
}

/// Handle one request frame from an authenticated connection.
///
/// Identity always comes from the session; nothing in the frame can name a
/// different sender or actor.
pub fn handle_message(text: &str, session: &Session, state: &ServerState) {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(user_id = %session.user_id, error = %e, "Failed to parse message");
            session.reply(&WsMessage::error(None, "bad_request", e.to_string()));
            return;
        }
    };

    let user_id = session.user_id.as_str();

    match msg {
        WsMessage::Subscribe {
            request_id,
            conversation,
        } => match state.subscribe(&session.connection_id, user_id, &conversation, session.tx.clone()) {
            Ok(subscription_id) => session.reply(&WsMessage::Subscribed {
                request_id,
                subscription_id,
            }),
            Err(e) => session.reply_error(&request_id, &e),
        },
        WsMessage::Unsubscribe {
            request_id,
            subscription_id,
        } => {
            // Unknown ids are fine: unsubscribe never fails
            state.unsubscribe(&session.connection_id, &subscription_id);
            session.reply(&WsMessage::Unsubscribed { request_id });
        }
        WsMessage::Send {
            request_id,
            conversation,
            content,
            client_msg_id,
        } => match state.send(&conversation, user_id, &content, client_msg_id.as_deref()) {
            Ok(message) => session.reply(&WsMessage::Ack {
                request_id,
                message,
            }),
            Err(e) => {
                warn!(user_id = %user_id, code = e.code(), error = %e, "Send rejected");
                session.reply_error(&request_id, &e);
            }
        },
        WsMessage::History {
            request_id,
            conversation,
            limit,
        } => match state.store.history(&conversation, user_id, limit) {
            Ok(messages) => session.reply(&WsMessage::HistoryResult {
                request_id,
                messages,
            }),
            Err(e) => session.reply_error(&request_id, &e),
        },
        WsMessage::CreateRoom { request_id, name } => {
            match state.store.create_room(user_id, &name) {
                Ok(room) => session.reply(&WsMessage::RoomCreated { request_id, room }),
                Err(e) => session.reply_error(&request_id, &e),
            }
        }
        WsMessage::AddMember {
            request_id,
            room_id,
            user_id: member_id,
            role,
        } => match state.store.add_member(&room_id, user_id, &member_id, role) {
            Ok(()) => session.reply(&WsMessage::MemberAdded {
                request_id,
                room_id,
                user_id: member_id,
            }),
            Err(e) => session.reply_error(&request_id, &e),
        },
        WsMessage::ListRooms { request_id } => match state.store.rooms_for(user_id) {
            Ok(rooms) => session.reply(&WsMessage::Rooms { request_id, rooms }),
            Err(e) => session.reply_error(&request_id, &e),
        },
        WsMessage::ListMembers {
            request_id,
            room_id,
        } => match state.store.members(&room_id, user_id) {
            Ok(members) => session.reply(&WsMessage::Members {
                request_id,
                room_id,
                members,
            }),
            Err(e) => session.reply_error(&request_id, &e),
        },
        WsMessage::Connect { .. } => {
            // Already authenticated, ignore
        }
        other => {
            // Server-only frames
            debug!(user_id = %user_id, frame = ?other, "Ignoring server-only frame from client");
            session.reply(&WsMessage::error(
                other.request_id().map(str::to_string),
                "bad_request",
                "unexpected frame type",
            ));
        }
    }
}
