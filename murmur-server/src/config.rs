use std::path::PathBuf;

const DEFAULT_ADDR: &str = "0.0.0.0:9001";
const DEFAULT_DB_PATH: &str = "murmur.db";

/// Runtime settings for the server binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub db_path: PathBuf,
    pub access_token: Option<String>,
}

impl ServerConfig {
    /// Read `MURMUR_SERVER_ADDR`, `MURMUR_DB_PATH` and `MURMUR_ACCESS_TOKEN`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let addr = lookup("MURMUR_SERVER_ADDR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let db_path = lookup("MURMUR_DB_PATH")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let access_token = lookup("MURMUR_ACCESS_TOKEN").filter(|v| !v.is_empty());

        Self {
            addr,
            db_path: PathBuf::from(db_path),
            access_token,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "0.0.0.0:9001");
        assert_eq!(config.db_path, PathBuf::from("murmur.db"));
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MURMUR_SERVER_ADDR", "127.0.0.1:7000"),
            ("MURMUR_DB_PATH", "/tmp/chat.db"),
            ("MURMUR_ACCESS_TOKEN", "secret"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.addr, "127.0.0.1:7000");
        assert_eq!(config.db_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_blank_values_fall_back() {
        let config = ServerConfig::from_lookup(|_| Some(String::new()));
        assert_eq!(config, ServerConfig::default());
    }
}
