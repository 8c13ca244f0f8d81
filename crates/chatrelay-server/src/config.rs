//! Relay configuration.
//!
//! Loading flow:
//! 1. Start with [`ServerConfig::default()`]
//! 2. If a JSON file is given, deep-merge its values over the defaults
//! 3. Apply `CHATRELAY_*` environment variable overrides
//! 4. Validate the result
//!
//! Deep merge rules: objects merge per key, arrays and primitives are
//! replaced, `null` in the file keeps the default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Runtime settings for the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; `0` picks an ephemeral port.
    pub port: u16,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Read deadline, renewed whenever a pong arrives.
    pub read_timeout_secs: u64,
    /// Deadline for writing a single outbound frame.
    pub write_timeout_secs: u64,
    /// Interval between keepalive pings. Must be shorter than the read deadline.
    pub ping_interval_secs: u64,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Broadcast queue capacity. Oldest entries are dropped when full.
    pub queue_capacity: usize,
    /// Per-connection outbound mailbox capacity.
    pub mailbox_capacity: usize,
    /// Records returned by the history endpoint.
    pub history_limit: usize,
    /// Accepted `Origin` values for upgrades. Empty admits any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("chat.db"),
            read_timeout_secs: 60,
            write_timeout_secs: 10,
            ping_interval_secs: 25,
            max_message_size: 1024 * 1024,
            queue_capacity: 128,
            mailbox_capacity: 256,
            history_limit: 10,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from an optional JSON file plus the process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        apply_overrides(&mut config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the file's values merged over them. The file must exist.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading config file");
        let defaults = serde_json::to_value(Self::default())?;
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        Ok(serde_json::from_value(deep_merge(defaults, user))?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if self.read_timeout_secs == 0 {
            return Err(invalid("read_timeout_secs must be positive"));
        }
        if self.write_timeout_secs == 0 {
            return Err(invalid("write_timeout_secs must be positive"));
        }
        if self.ping_interval_secs == 0 {
            return Err(invalid("ping_interval_secs must be positive"));
        }
        if self.ping_interval_secs >= self.read_timeout_secs {
            return Err(invalid(format!(
                "ping_interval_secs ({}) must be less than read_timeout_secs ({})",
                self.ping_interval_secs, self.read_timeout_secs
            )));
        }
        if self.max_message_size == 0 {
            return Err(invalid("max_message_size must be positive"));
        }
        // tokio's broadcast channel rounds its capacity up to a power of two.
        if !self.queue_capacity.is_power_of_two() {
            return Err(invalid(format!(
                "queue_capacity ({}) must be a power of two",
                self.queue_capacity
            )));
        }
        if self.mailbox_capacity == 0 {
            return Err(invalid("mailbox_capacity must be positive"));
        }
        if self.history_limit == 0 {
            return Err(invalid("history_limit must be positive"));
        }
        Ok(())
    }

    /// `host:port`, bracketing IPv6 hosts.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Set host and port from a `host:port` string.
    pub fn set_listen(&mut self, addr: &str) -> Result<(), ConfigError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| invalid(format!("listen address {addr:?} is not host:port")))?;
        let port = port
            .parse()
            .map_err(|_| invalid(format!("listen port {port:?} is not a valid port")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        self.host = if host.is_empty() { "0.0.0.0".into() } else { host.into() };
        self.port = port;
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CHATRELAY_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored, keeping the file or default value.
pub fn apply_overrides<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = read("CHATRELAY_HOST") {
        config.host = v;
    }
    if let Some(v) = read("CHATRELAY_PORT").and_then(|v| parse_env("CHATRELAY_PORT", &v)) {
        config.port = v;
    }
    if let Some(v) = read("CHATRELAY_DB_PATH") {
        config.db_path = PathBuf::from(v);
    }
    if let Some(v) = read_u64(&read, "CHATRELAY_READ_TIMEOUT_SECS", 1, 3600) {
        config.read_timeout_secs = v;
    }
    if let Some(v) = read_u64(&read, "CHATRELAY_WRITE_TIMEOUT_SECS", 1, 3600) {
        config.write_timeout_secs = v;
    }
    if let Some(v) = read_u64(&read, "CHATRELAY_PING_INTERVAL_SECS", 1, 3600) {
        config.ping_interval_secs = v;
    }
    if let Some(v) = read_usize(&read, "CHATRELAY_MAX_MESSAGE_SIZE", 1, 64 * 1024 * 1024) {
        config.max_message_size = v;
    }
    if let Some(v) = read_usize(&read, "CHATRELAY_QUEUE_CAPACITY", 1, 1 << 20) {
        config.queue_capacity = v;
    }
    if let Some(v) = read_usize(&read, "CHATRELAY_MAILBOX_CAPACITY", 1, 1 << 20) {
        config.mailbox_capacity = v;
    }
    if let Some(v) = read_usize(&read, "CHATRELAY_HISTORY_LIMIT", 1, 10_000) {
        config.history_limit = v;
    }
    if let Some(v) = read("CHATRELAY_ALLOWED_ORIGINS") {
        config.allowed_origins = parse_list(&v);
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blank entries.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Option<T> {
    let parsed = val.trim().parse().ok();
    if parsed.is_none() {
        warn!(key, value = %val, "invalid env var, ignoring");
    }
    parsed
}

fn read_u64<R>(read: &R, key: &str, min: u64, max: u64) -> Option<u64>
where
    R: Fn(&str) -> Option<String>,
{
    let val = read(key)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_usize<R>(read: &R, key: &str, min: usize, max: usize) -> Option<usize>
where
    R: Fn(&str) -> Option<String>,
{
    let val = read(key)?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.db_path, PathBuf::from("chat.db"));
        assert_eq!(cfg.read_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.write_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.ping_interval(), Duration::from_secs(25));
        assert_eq!(cfg.max_message_size, 1 << 20);
        assert_eq!(cfg.queue_capacity, 128);
        assert_eq!(cfg.history_limit, 10);
        assert!(cfg.allowed_origins.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn merge_overrides_keys_and_keeps_rest() {
        let target = serde_json::json!({"port": 8080, "host": "0.0.0.0"});
        let source = serde_json::json!({"port": 9000, "host": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["port"], 9000);
        assert_eq!(merged["host"], "0.0.0.0");
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = serde_json::json!({"allowed_origins": ["a", "b"]});
        let source = serde_json::json!({"allowed_origins": ["c"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["allowed_origins"], serde_json::json!(["c"]));
    }

    #[test]
    fn from_file_merges_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"port": 9001, "history_limit": 25}"#).unwrap();
        let cfg = ServerConfig::from_file(&path).unwrap();
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.history_limit, 25);
        assert_eq!(cfg.read_timeout_secs, 60);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::from_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn from_file_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn from_file_wrong_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"port": "eighty"}"#).unwrap();
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = ServerConfig::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("CHATRELAY_PORT", "9100"),
                ("CHATRELAY_HOST", "127.0.0.1"),
                ("CHATRELAY_DB_PATH", "/tmp/x.db"),
                ("CHATRELAY_READ_TIMEOUT_SECS", "90"),
                ("CHATRELAY_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
            ]),
        );
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.read_timeout_secs, 90);
        assert_eq!(cfg.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut cfg = ServerConfig::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("CHATRELAY_PORT", "99999"),
                ("CHATRELAY_QUEUE_CAPACITY", "0"),
                ("CHATRELAY_WRITE_TIMEOUT_SECS", "soon"),
                ("CHATRELAY_HOST", ""),
            ]),
        );
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn range_parsers() {
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("x", 1, 100), None);
        assert_eq!(parse_usize_range(" 5 ", 1, 10), Some(5));
        assert_eq!(parse_usize_range("11", 1, 10), None);
    }

    #[test]
    fn validate_rejects_ping_not_below_read_timeout() {
        let cfg = ServerConfig {
            ping_interval_secs: 60,
            ..ServerConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("ping_interval_secs"));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let zero_write = ServerConfig {
            write_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert!(zero_write.validate().is_err());

        let zero_mailbox = ServerConfig {
            mailbox_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(zero_mailbox.validate().is_err());

        let zero_queue = ServerConfig {
            queue_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(zero_queue.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_power_of_two_queue() {
        let cfg = ServerConfig {
            queue_capacity: 100,
            ..ServerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn set_listen_parses_host_and_port() {
        let mut cfg = ServerConfig::default();
        cfg.set_listen("127.0.0.1:9000").unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn set_listen_port_only() {
        let mut cfg = ServerConfig::default();
        cfg.set_listen(":7000").unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 7000);
    }

    #[test]
    fn set_listen_ipv6() {
        let mut cfg = ServerConfig::default();
        cfg.set_listen("[::1]:8081").unwrap();
        assert_eq!(cfg.host, "::1");
        assert_eq!(cfg.listen_addr(), "[::1]:8081");
    }

    #[test]
    fn set_listen_rejects_garbage() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.set_listen("localhost").is_err());
        assert!(cfg.set_listen("localhost:http").is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
