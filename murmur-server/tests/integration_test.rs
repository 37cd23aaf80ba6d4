//! Integration tests for the Murmur WebSocket server
//!
//! These tests spin up a real server and connect clients to verify
//! subscriptions, fan-out, history and the authorization boundary.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use murmur_server::ServerState;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Start a test server on a random available port
async fn start_test_server(state: ServerState) -> (u16, Arc<ServerState>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let state = Arc::new(state);
    let server_state = state.clone();

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let ws_stream = tokio_tungstenite::accept_async(stream).await.unwrap();
            let state = server_state.clone();
            tokio::spawn(async move {
                murmur_server::handle_connection(ws_stream, state).await;
            });
        }
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, state, handle)
}

async fn read_json(client: &mut Client) -> Value {
    let msg = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("Timeout waiting for frame")
        .expect("Stream closed")
        .expect("Read error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected text message, got {:?}", other),
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Connect a client to the server and authenticate
async fn connect_client(port: u16, user_id: &str) -> Client {
    let url = format!("ws://127.0.0.1:{}", port);
    let (mut client, _) = connect_async(&url).await.expect("Failed to connect");

    send_json(&mut client, json!({ "type": "connect", "user_id": user_id })).await;

    let msg = read_json(&mut client).await;
    assert_eq!(msg["type"], "auth_response");
    assert_eq!(msg["success"], true);

    client
}

/// Wait for the reply to `request_id`, collecting pushed events on the way
async fn reply_to(client: &mut Client, request_id: &str, events: &mut Vec<Value>) -> Value {
    loop {
        let msg = read_json(client).await;
        if msg["type"] == "event" {
            events.push(msg);
            continue;
        }
        if msg["request_id"] == request_id {
            return msg;
        }
    }
}

async fn subscribe(client: &mut Client, conversation: Value) -> String {
    send_json(
        client,
        json!({ "type": "subscribe", "request_id": "sub", "conversation": conversation }),
    )
    .await;
    let reply = reply_to(client, "sub", &mut Vec::new()).await;
    assert_eq!(reply["type"], "subscribed", "subscribe failed: {}", reply);
    reply["subscription_id"].as_str().unwrap().to_string()
}

/// Assert that nothing arrives within a short window
async fn assert_silent(client: &mut Client) {
    let result = timeout(Duration::from_millis(300), client.next()).await;
    assert!(result.is_err(), "Unexpected frame: {:?}", result);
}

fn dm(a: &str, b: &str) -> Value {
    json!({ "kind": "direct", "a": a, "b": b })
}

#[tokio::test]
async fn test_client_connects_and_authenticates() {
    let (port, _state, server_handle) = start_test_server(ServerState::in_memory().unwrap()).await;

    let _client = connect_client(port, "user1").await;

    server_handle.abort();
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let state = ServerState::in_memory()
        .unwrap()
        .with_access_token(Some("letmein".to_string()));
    let (port, _state, server_handle) = start_test_server(state).await;

    let url = format!("ws://127.0.0.1:{}", port);
    let (mut client, _) = connect_async(&url).await.unwrap();
    send_json(
        &mut client,
        json!({ "type": "connect", "user_id": "alice", "token": "guess" }),
    )
    .await;

    let msg = read_json(&mut client).await;
    assert_eq!(msg["type"], "auth_response");
    assert_eq!(msg["success"], false);

    server_handle.abort();
}

#[tokio::test]
async fn test_direct_message_reaches_both_sides() {
    let (port, _state, server_handle) = start_test_server(ServerState::in_memory().unwrap()).await;

    let mut alice = connect_client(port, "alice").await;
    let mut bob = connect_client(port, "bob").await;
    subscribe(&mut alice, dm("alice", "bob")).await;
    // Reversed pair names the same conversation
    subscribe(&mut bob, dm("bob", "alice")).await;

    send_json(
        &mut alice,
        json!({
            "type": "send",
            "request_id": "s1",
            "conversation": dm("alice", "bob"),
            "content": "Hi",
            "client_msg_id": "c1"
        }),
    )
    .await;

    let mut alice_events = Vec::new();
    let ack = reply_to(&mut alice, "s1", &mut alice_events).await;
    assert_eq!(ack["type"], "ack");
    let id = ack["message"]["id"].as_str().unwrap().to_string();
    assert_eq!(ack["message"]["client_msg_id"], "c1");

    // The sender receives its own row on the feed too
    if alice_events.is_empty() {
        alice_events.push(read_json(&mut alice).await);
    }
    assert_eq!(alice_events[0]["message"]["id"], id.as_str());

    let event = read_json(&mut bob).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["message"]["id"], id.as_str());
    assert_eq!(event["message"]["sender_id"], "alice");
    assert_eq!(event["message"]["content"], "Hi");

    // bob's history shows exactly one message
    send_json(
        &mut bob,
        json!({ "type": "history", "request_id": "h1", "conversation": dm("bob", "alice") }),
    )
    .await;
    let history = reply_to(&mut bob, "h1", &mut Vec::new()).await;
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], id.as_str());

    server_handle.abort();
}

#[tokio::test]
async fn test_room_fan_out_and_outsider() {
    let (port, _state, server_handle) = start_test_server(ServerState::in_memory().unwrap()).await;

    let mut owner = connect_client(port, "tutor").await;
    let mut member = connect_client(port, "student").await;
    let mut outsider = connect_client(port, "mallory").await;

    send_json(
        &mut owner,
        json!({ "type": "create_room", "request_id": "c1", "name": "Algebra" }),
    )
    .await;
    let created = reply_to(&mut owner, "c1", &mut Vec::new()).await;
    assert_eq!(created["type"], "room_created");
    let room_id = created["room"]["id"].as_str().unwrap().to_string();
    let room = json!({ "kind": "room", "room_id": room_id });

    send_json(
        &mut owner,
        json!({ "type": "add_member", "request_id": "a1", "room_id": room_id, "user_id": "student" }),
    )
    .await;
    assert_eq!(reply_to(&mut owner, "a1", &mut Vec::new()).await["type"], "member_added");

    subscribe(&mut member, room.clone()).await;

    // mallory cannot subscribe
    send_json(
        &mut outsider,
        json!({ "type": "subscribe", "request_id": "m1", "conversation": room }),
    )
    .await;
    let refused = reply_to(&mut outsider, "m1", &mut Vec::new()).await;
    assert_eq!(refused["type"], "error");
    assert_eq!(refused["code"], "forbidden");

    send_json(
        &mut owner,
        json!({ "type": "send", "request_id": "s1", "conversation": room, "content": "Homework is up" }),
    )
    .await;
    assert_eq!(reply_to(&mut owner, "s1", &mut Vec::new()).await["type"], "ack");

    let event = read_json(&mut member).await;
    assert_eq!(event["message"]["content"], "Homework is up");
    assert_silent(&mut outsider).await;

    server_handle.abort();
}

#[tokio::test]
async fn test_blank_message_is_rejected_without_event() {
    let (port, _state, server_handle) = start_test_server(ServerState::in_memory().unwrap()).await;

    let mut alice = connect_client(port, "alice").await;
    let mut bob = connect_client(port, "bob").await;
    subscribe(&mut bob, dm("alice", "bob")).await;

    send_json(
        &mut alice,
        json!({ "type": "send", "request_id": "s1", "conversation": dm("alice", "bob"), "content": "   " }),
    )
    .await;
    let reply = reply_to(&mut alice, "s1", &mut Vec::new()).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "validation_error");

    assert_silent(&mut bob).await;

    server_handle.abort();
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery_and_is_idempotent() {
    let (port, _state, server_handle) = start_test_server(ServerState::in_memory().unwrap()).await;

    let mut alice = connect_client(port, "alice").await;
    let mut bob = connect_client(port, "bob").await;
    let subscription_id = subscribe(&mut bob, dm("alice", "bob")).await;

    for request_id in ["u1", "u2"] {
        send_json(
            &mut bob,
            json!({ "type": "unsubscribe", "request_id": request_id, "subscription_id": subscription_id }),
        )
        .await;
        assert_eq!(reply_to(&mut bob, request_id, &mut Vec::new()).await["type"], "unsubscribed");
    }

    send_json(
        &mut alice,
        json!({ "type": "send", "request_id": "s1", "conversation": dm("alice", "bob"), "content": "anyone?" }),
    )
    .await;
    assert_eq!(reply_to(&mut alice, "s1", &mut Vec::new()).await["type"], "ack");

    assert_silent(&mut bob).await;

    server_handle.abort();
}

#[tokio::test]
async fn test_closed_connection_drops_its_subscriptions() {
    let (port, state, server_handle) = start_test_server(ServerState::in_memory().unwrap()).await;

    let mut bob = connect_client(port, "bob").await;
    subscribe(&mut bob, dm("alice", "bob")).await;
    subscribe(&mut bob, dm("carol", "bob")).await;
    assert_eq!(state.feed.len(), 2);

    bob.close(None).await.unwrap();
    drop(bob);

    let drained = timeout(Duration::from_secs(5), async {
        while !state.feed.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "Subscriptions were not released");

    server_handle.abort();
}

#[tokio::test]
async fn test_history_limit_returns_latest_ascending() {
    let (port, _state, server_handle) = start_test_server(ServerState::in_memory().unwrap()).await;

    let mut alice = connect_client(port, "alice").await;
    for (i, text) in ["one", "two", "three"].iter().enumerate() {
        let request_id = format!("s{}", i);
        send_json(
            &mut alice,
            json!({ "type": "send", "request_id": request_id, "conversation": dm("alice", "bob"), "content": text }),
        )
        .await;
        assert_eq!(reply_to(&mut alice, &request_id, &mut Vec::new()).await["type"], "ack");
    }

    send_json(
        &mut alice,
        json!({ "type": "history", "request_id": "h1", "conversation": dm("bob", "alice"), "limit": 2 }),
    )
    .await;
    let history = reply_to(&mut alice, "h1", &mut Vec::new()).await;
    let contents: Vec<&str> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["two", "three"]);

    server_handle.abort();
}
