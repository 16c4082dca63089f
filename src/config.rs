//! DenKV Sender Configuration
//!
//! Configuration for the node identity and the binlog sender. Loaded from
//! TOML; every knob has a default matching the shipped design values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenKvConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Binlog sender configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Listen address advertised to peers
    pub ip: String,

    /// Listen port advertised to peers
    pub port: u16,

    /// Data directory holding per-partition binlogs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Binlog sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of sender workers draining the task pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Backoff and idle-sleep unit in milliseconds
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// Maximum wall time a worker spends on one task per fetch, in
    /// milliseconds
    #[serde(default = "default_time_slice_ms")]
    pub time_slice_ms: u64,

    /// Lower bound on the lease advertised to followers, in seconds
    #[serde(default = "default_min_lease_secs")]
    pub min_lease_secs: u64,

    /// Slack added on top of the load-derived lease, in seconds
    #[serde(default = "default_redundant_lease_secs")]
    pub redundant_lease_secs: u64,

    /// Peer connect timeout in milliseconds
    #[serde(default = "default_peer_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Peer send timeout in milliseconds
    #[serde(default = "default_peer_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log to file path (optional)
    pub file: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/denkv")
}

fn default_worker_threads() -> usize {
    4
}

fn default_send_interval_ms() -> u64 {
    1000
}

fn default_time_slice_ms() -> u64 {
    1000
}

fn default_min_lease_secs() -> u64 {
    10
}

fn default_redundant_lease_secs() -> u64 {
    3
}

fn default_peer_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            send_interval_ms: default_send_interval_ms(),
            time_slice_ms: default_time_slice_ms(),
            min_lease_secs: default_min_lease_secs(),
            redundant_lease_secs: default_redundant_lease_secs(),
            connect_timeout_ms: default_peer_timeout_ms(),
            send_timeout_ms: default_peer_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl SyncConfig {
    /// Backoff and idle-sleep unit
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// Maximum wall time per task per fetch
    pub fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }

    /// Peer connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Peer send timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl DenKvConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: DenKvConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.ip.is_empty() {
            return Err(crate::Error::Config("node.ip cannot be empty".into()));
        }
        if self.sync.worker_threads == 0 {
            return Err(crate::Error::Config(
                "sync.worker_threads must be at least 1".into(),
            ));
        }
        if self.sync.time_slice_ms == 0 {
            return Err(crate::Error::Config(
                "sync.time_slice_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
ip = "10.0.0.7"
port = 9221
data_dir = "/srv/denkv"

[sync]
worker_threads = 2
send_interval_ms = 500

[logging]
level = "debug"
"#;

        let config = DenKvConfig::from_str(toml).unwrap();
        assert_eq!(config.node.ip, "10.0.0.7");
        assert_eq!(config.node.port, 9221);
        assert_eq!(config.sync.worker_threads, 2);
        assert_eq!(config.sync.send_interval(), Duration::from_millis(500));
        // Unset knobs fall back to the design values
        assert_eq!(config.sync.time_slice(), Duration::from_millis(1000));
        assert_eq!(config.sync.min_lease_secs, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("denkv.toml");
        std::fs::write(&path, "[node]\nip = \"10.0.0.7\"\nport = 9221\n").unwrap();

        let config = DenKvConfig::from_file(&path).unwrap();
        assert_eq!(config.node.port, 9221);
        assert_eq!(config.sync.worker_threads, 4);

        assert!(DenKvConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let toml = r#"
[node]
ip = "10.0.0.7"
port = 9221

[sync]
worker_threads = 0
"#;

        assert!(DenKvConfig::from_str(toml).is_err());
    }
}
