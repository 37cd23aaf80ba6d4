use std::time::Duration;

use tracing::info;

/// Server URL: checked at compile time via option_env!, falls back to runtime env var, then default
const DEFAULT_SERVER_URL: &str = "ws://localhost:9001";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Connection settings for a [`StoreClient`](crate::StoreClient)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub access_token: Option<String>,
    /// Upper bound for one request/reply round trip, append included
    pub request_timeout: Duration,
    /// Pause between reconnect attempts
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            access_token: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }

    pub fn from_env() -> Self {
        // Priority: build-time env -> runtime env -> default
        let build_time_url = option_env!("MURMUR_SERVER_URL");
        let runtime_url = std::env::var("MURMUR_SERVER_URL").ok();

        info!(
            build_time = ?build_time_url,
            runtime = ?runtime_url,
            "WebSocket URL sources"
        );

        Self::resolve(build_time_url, |key| std::env::var(key).ok())
    }

    fn resolve(build_time_url: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let server_url = build_time_url
            .map(String::from)
            .or_else(|| lookup("MURMUR_SERVER_URL"))
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        let millis = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        Self {
            server_url,
            access_token: lookup("MURMUR_ACCESS_TOKEN").filter(|t| !t.is_empty()),
            request_timeout: Duration::from_millis(millis(
                "MURMUR_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )),
            reconnect_delay: Duration::from_millis(millis(
                "MURMUR_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}
