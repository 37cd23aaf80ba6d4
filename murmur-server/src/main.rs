use std::sync::Arc;

use murmur_server::{handle_connection, Database, ServerConfig, ServerState};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Optional .env next to the binary
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let db = match Database::open(&config.db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database at {}: {}", config.db_path.display(), e);
            std::process::exit(1);
        }
    };
    if config.access_token.is_some() {
        info!("Access token required for connections");
    }

    // Create server state
    let state = Arc::new(ServerState::new(db).with_access_token(config.access_token.clone()));

    // Bind TCP listener
    let listener = match TcpListener::bind(&config.addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };

    info!("Murmur server listening on {}", config.addr);

    // Accept connections
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);

                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => {
                            handle_connection(ws_stream, state).await;
                        }
                        Err(e) => {
                            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
