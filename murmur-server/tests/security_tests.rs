use murmur_server::{handle_message, ConversationKey, ServerState, Session, WsMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

fn session(user_id: &str) -> (Session, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Session {
            connection_id: format!("conn-{}", user_id),
            user_id: user_id.to_string(),
            tx,
        },
        rx,
    )
}

fn parse(raw: &str) -> WsMessage {
    serde_json::from_str(raw).unwrap()
}

#[tokio::test]
async fn test_sender_spoofing_protection() {
    let state = Arc::new(ServerState::in_memory().unwrap());
    let (victim, mut victim_rx) = session("victim");
    let (attacker, mut attacker_rx) = session("attacker");

    let dm = ConversationKey::direct("attacker", "victim");
    state
        .subscribe(&victim.connection_id, "victim", &dm, victim.tx.clone())
        .unwrap();

    // "attacker" claims to be "admin" inside the frame
    let spoofed_json = r#"{
        "type": "send",
        "request_id": "r1",
        "sender_id": "admin",
        "conversation": {"kind": "direct", "a": "attacker", "b": "victim"},
        "content": "Click this link"
    }"#;
    handle_message(spoofed_json, &attacker, &state);

    assert!(matches!(parse(&attacker_rx.recv().await.unwrap()), WsMessage::Ack { .. }));

    match parse(&victim_rx.recv().await.unwrap()) {
        WsMessage::Event { message, .. } => {
            assert_eq!(message.sender_id, "attacker", "Sender ID should be the connection's user");
            assert_ne!(message.sender_id, "admin", "Spoofed sender ID 'admin' persisted!");
        }
        other => panic!("Expected Event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cannot_write_into_foreign_direct_pair() {
    let state = Arc::new(ServerState::in_memory().unwrap());
    let (victim, mut victim_rx) = session("victim");
    let (attacker, mut attacker_rx) = session("attacker");

    let dm = ConversationKey::direct("admin", "victim");
    state
        .subscribe(&victim.connection_id, "victim", &dm, victim.tx.clone())
        .unwrap();

    let forged = WsMessage::Send {
        request_id: "r1".to_string(),
        conversation: dm.clone(),
        content: "I am admin".to_string(),
        client_msg_id: None,
    };
    handle_message(&serde_json::to_string(&forged).unwrap(), &attacker, &state);

    match parse(&attacker_rx.recv().await.unwrap()) {
        WsMessage::Error { code, .. } => assert_eq!(code, "forbidden"),
        other => panic!("Expected Error, got {:?}", other),
    }
    assert!(victim_rx.try_recv().is_err());
    assert!(state.store.history(&dm, "victim", None).unwrap().is_empty());
}

#[tokio::test]
async fn test_cannot_read_or_subscribe_to_foreign_room() {
    let state = Arc::new(ServerState::in_memory().unwrap());
    let room = state.store.create_room("owner", "Private").unwrap();
    let key = ConversationKey::room(room.id.clone());
    state.send(&key, "owner", "secret", None).unwrap();

    let (outsider, mut rx) = session("outsider");
    for frame in [
        WsMessage::History {
            request_id: "h1".to_string(),
            conversation: key.clone(),
            limit: None,
        },
        WsMessage::Subscribe {
            request_id: "s1".to_string(),
            conversation: key.clone(),
        },
    ] {
        handle_message(&serde_json::to_string(&frame).unwrap(), &outsider, &state);
        match parse(&rx.recv().await.unwrap()) {
            WsMessage::Error { code, .. } => assert_eq!(code, "forbidden"),
            other => panic!("Expected Error, got {:?}", other),
        }
    }
    assert!(state.feed.is_empty());
}

#[tokio::test]
async fn test_member_cannot_promote_themselves() {
    let state = Arc::new(ServerState::in_memory().unwrap());
    let room = state.store.create_room("owner", "Class").unwrap();
    state
        .store
        .add_member(&room.id, "owner", "student", murmur_server::Role::Member)
        .unwrap();

    let (student, mut rx) = session("student");
    let escalate = r#"{"type":"add_member","request_id":"r1","room_id":"ROOM","user_id":"student","role":"owner"}"#
        .replace("ROOM", &room.id);
    handle_message(&escalate, &student, &state);

    match parse(&rx.recv().await.unwrap()) {
        WsMessage::Error { code, .. } => assert_eq!(code, "forbidden"),
        other => panic!("Expected Error, got {:?}", other),
    }
    let members = state.store.members(&room.id, "owner").unwrap();
    let role = members
        .iter()
        .find(|m| m.user_id == "student")
        .map(|m| m.role);
    assert_eq!(role, Some(murmur_server::Role::Member));
}
