use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use murmur_client::{
    ClientConfig, ConversationKey, ConversationView, Entry, EntryStatus, StoreClient, ViewConfig,
    ViewEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn exit_with(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

fn render(entry: &Entry) -> String {
    let marker = match &entry.status {
        EntryStatus::Confirmed => "",
        EntryStatus::Pending => " (sending)",
        EntryStatus::Failed(_) => " (failed, /retry)",
    };
    format!(
        "[{}] {}: {}{}",
        timestamp(entry.created_at),
        entry.sender_id,
        entry.content,
        marker
    )
}

fn print_transcript(view: &ConversationView) {
    println!("--- {} ---", view.conversation().label_for(view.user_id()));
    for entry in view.entries() {
        println!("{}", render(entry));
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Logs go to a file so stdout stays free for the conversation
    let log_dir = std::env::var("MURMUR_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "murmur-chat.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let user_id = std::env::var("MURMUR_USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| exit_with("MURMUR_USER is not set"));

    let room = std::env::var("MURMUR_ROOM").ok();
    let peer = std::env::var("MURMUR_PEER").ok();
    let conversation = ConversationKey::choose(&user_id, room.as_deref(), peer.as_deref())
        .unwrap_or_else(|| exit_with("Set MURMUR_ROOM, or MURMUR_PEER to another user"));

    let config = ClientConfig::from_env();
    let view_config = ViewConfig {
        append_timeout: config.request_timeout,
        ..ViewConfig::default()
    };
    info!(user_id = %user_id, server = %config.server_url, "Starting murmur-chat");

    let client = Arc::new(StoreClient::new(config, user_id));
    if let Err(e) = client.connect() {
        exit_with(&format!("Cannot start connection: {}", e));
    }
    if let Err(e) = client.wait_connected(CONNECT_TIMEOUT).await {
        exit_with(&format!("Cannot reach {}: {}", client.server_url(), e));
    }

    let mut view = match ConversationView::open(client.clone(), conversation, view_config).await {
        Ok(view) => view,
        Err(e) => exit_with(&format!("Cannot open conversation: {}", e)),
    };
    print_transcript(&view);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                match line.trim() {
                    "/quit" => break,
                    "/retry" => {
                        for client_msg_id in view.transcript().failed() {
                            if let Err(e) = view.retry(&client_msg_id) {
                                println!("! {}", e);
                            }
                        }
                    }
                    "/reload" => match view.load_history().await {
                        Ok(_) => print_transcript(&view),
                        Err(e) => println!("! history unavailable: {}", e),
                    },
                    _ => match view.send(&line) {
                        Ok(client_msg_id) => {
                            if let Some(entry) = view.transcript().get(&client_msg_id) {
                                println!("{}", render(entry));
                            }
                        }
                        Err(e) => println!("! {}", e),
                    },
                }
            }
            event = view.next_event() => match event {
                Some(ViewEvent::MessageArrived(message)) => {
                    println!(
                        "[{}] {}: {}",
                        timestamp(message.created_at),
                        message.sender_id,
                        message.content
                    );
                }
                Some(ViewEvent::Confirmed { .. }) => {}
                Some(ViewEvent::Failed { error, .. }) => {
                    println!("! not sent ({}), type /retry", error);
                }
                Some(ViewEvent::LinkChanged { state, .. }) => println!("-- link {}", state),
                Some(ViewEvent::HistoryReloaded { merged }) => {
                    if merged > 0 {
                        print_transcript(&view);
                    }
                }
                Some(ViewEvent::HistoryFailed(e)) => {
                    println!("! history unavailable: {}, type /reload", e);
                }
                Some(ViewEvent::Closed) | None => break,
            },
        }
    }

    view.close();
    client.disconnect();
}
