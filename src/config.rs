//! JSON-file-backed configuration for the hub server and relay client
//! binaries. The library modules themselves (`hub`, `socket`, `proxy`)
//! accept already-parsed primitive values and know nothing about files or
//! JSON; this module exists only for the two binaries.

use std::path::Path;

use serde::Deserialize;

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file's contents were not valid JSON for the expected shape.
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Listen address and per-connection sizing for the hub server.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Socket address family/protocol, e.g. `"tcp"` or `"tcp4"`.
    pub net_type: String,
    /// Per-socket outbound send queue bound.
    pub send_queue_size: usize,
    /// Reader task buffer size, in bytes.
    pub read_buf_size: usize,
    /// Writer task buffer size, in bytes (currently informational; writes
    /// are flushed per frame).
    pub write_buf_size: usize,
    /// Bound for each of the hub's three dispatch channels.
    pub hub_queue_size: usize,
}

impl HubConfig {
    /// The `host:port` address to bind.
    pub fn host_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads a [`HubConfig`] from a JSON file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Dial target and per-connection sizing for the relay client.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Host to dial.
    pub host: String,
    /// Port to dial.
    pub port: u16,
    /// Socket address family/protocol, e.g. `"tcp"` or `"tcp4"`.
    pub net_type: String,
    /// Outbound send queue bound.
    pub send_queue_size: usize,
    /// Reader task buffer size, in bytes.
    pub read_buf_size: usize,
    /// Writer task buffer size, in bytes.
    pub write_buf_size: usize,
    /// Bound for the proxy's three event channels.
    pub proxy_queue_size: usize,
    /// Dial timeout, in seconds.
    pub dial_timeout_secs: u64,
}

impl ProxyConfig {
    /// The `host:port` address to dial.
    pub fn host_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads a [`ProxyConfig`] from a JSON file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_config_parses_from_json() {
        let json = r#"{
            "host": "0.0.0.0",
            "port": 9000,
            "net_type": "tcp",
            "send_queue_size": 64,
            "read_buf_size": 4096,
            "write_buf_size": 4096,
            "hub_queue_size": 256
        }"#;
        let config: HubConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.host_address(), "0.0.0.0:9000");
    }

    #[test]
    fn proxy_config_parses_from_json() {
        let json = r#"{
            "host": "127.0.0.1",
            "port": 9000,
            "net_type": "tcp",
            "send_queue_size": 64,
            "read_buf_size": 4096,
            "write_buf_size": 4096,
            "proxy_queue_size": 64,
            "dial_timeout_secs": 10
        }"#;
        let config: ProxyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.host_address(), "127.0.0.1:9000");
        assert_eq!(config.dial_timeout_secs, 10);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            HubConfig::from_path("/nonexistent/path/does-not-exist.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let dir = std::env::temp_dir().join("messagehub_config_test_malformed.json");
        std::fs::write(&dir, "{ not json").unwrap();
        assert!(matches!(HubConfig::from_path(&dir), Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_file(&dir);
    }
}
