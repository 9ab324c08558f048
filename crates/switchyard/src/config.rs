//! Server configuration.
//!
//! Loaded from a camelCase JSON file; every key is optional:
//!
//! ```json
//! {
//!   "host": "0.0.0.0",
//!   "port": 8080,
//!   "maxConnections": 1000,
//!   "maxMessageSize": 1048576,
//!   "heartbeatIntervalMs": 30000,
//!   "rateLimit": { "maxPerMinute": 100, "maxPerHour": 1000, "cleanupIntervalMs": 60000 },
//!   "streamChunkIntervalMs": 1000,
//!   "streamMaxChunks": 10,
//!   "outboundQueueSize": 256
//! }
//! ```
//!
//! `SWITCHYARD_HOST` and `SWITCHYARD_PORT` override the file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_ratelimit::RateLimitConfig;
use switchyard_session::RegistryConfig;
use switchyard_stream::StreamConfig;
use switchyard_transport::{DEFAULT_MAX_MESSAGE_SIZE, TransportConfig};
use tracing::warn;

pub const ENV_HOST: &str = "SWITCHYARD_HOST";
pub const ENV_PORT: &str = "SWITCHYARD_PORT";

/// Configuration for a Switchyard server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8080`; `0` picks a free port).
    pub port: u16,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,
    pub heartbeat_interval_ms: u64,
    pub rate_limit: RateLimitConfig,
    /// Apply the rate limiter to every inbound frame, not just admission.
    pub rate_limit_messages: bool,
    pub stream_chunk_interval_ms: u64,
    pub stream_max_chunks: u64,
    /// Per-connection outbound queue capacity.
    pub outbound_queue_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_connections: 1000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            heartbeat_interval_ms: 30_000,
            rate_limit: RateLimitConfig::default(),
            rate_limit_messages: true,
            stream_chunk_interval_ms: 1_000,
            stream_max_chunks: 10,
            outbound_queue_size: 256,
        }
    }
}

impl HubConfig {
    /// Reads `path`, applies environment overrides and validates.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(config.with_env_overrides()?.validated())
    }

    /// Parses a JSON document. Unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Parse)
    }

    /// Applies `SWITCHYARD_HOST` / `SWITCHYARD_PORT` from the process
    /// environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_PORT,
                value: port.clone(),
            })?;
        }
        Ok(self)
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// - zero `heartbeatIntervalMs` / `streamChunkIntervalMs` → default
    /// - zero `maxConnections`, `maxMessageSize`, `outboundQueueSize` → default
    /// - rate-limit windows fixed by [`RateLimitConfig::validated`]
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.heartbeat_interval_ms == 0 {
            warn!("heartbeatIntervalMs is 0, using default");
            self.heartbeat_interval_ms = defaults.heartbeat_interval_ms;
        }
        if self.stream_chunk_interval_ms == 0 {
            warn!("streamChunkIntervalMs is 0, using default");
            self.stream_chunk_interval_ms = defaults.stream_chunk_interval_ms;
        }
        if self.max_connections == 0 {
            warn!("maxConnections is 0, using default");
            self.max_connections = defaults.max_connections;
        }
        if self.max_message_size == 0 {
            warn!("maxMessageSize is 0, using default");
            self.max_message_size = defaults.max_message_size;
        }
        if self.outbound_queue_size == 0 {
            warn!("outboundQueueSize is 0, using default");
            self.outbound_queue_size = defaults.outbound_queue_size;
        }
        self.rate_limit = self.rate_limit.validated();
        self
    }

    /// `host:port`, as passed to the transport.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stream_chunk_interval(&self) -> Duration {
        Duration::from_millis(self.stream_chunk_interval_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_message_size: self.max_message_size,
            ..TransportConfig::default()
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_connections: self.max_connections,
            outbound_queue_size: self.outbound_queue_size,
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            chunk_interval: self.stream_chunk_interval(),
            max_chunks: self.stream_max_chunks,
        }
    }
}

/// Errors loading a [`HubConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.max_connections, 1000);
        assert_eq!(cfg.max_message_size, 1024 * 1024);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.stream_chunk_interval(), Duration::from_secs(1));
        assert_eq!(cfg.stream_max_chunks, 10);
        assert_eq!(cfg.rate_limit.max_per_minute, 100);
        assert!(cfg.rate_limit_messages);
    }

    #[test]
    fn test_from_json_partial_camel_case() {
        let cfg = HubConfig::from_json(
            r#"{"port": 9001, "streamMaxChunks": 3, "rateLimit": {"maxPerMinute": 5}}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.stream_max_chunks, 3);
        assert_eq!(cfg.rate_limit.max_per_minute, 5);
        assert_eq!(cfg.rate_limit.max_per_hour, 1000);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        let err = HubConfig::from_json(r#"{"port": "eighty"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides_replace_host_and_port() {
        let cfg = HubConfig::default()
            .with_overrides(|key| match key {
                ENV_HOST => Some("0.0.0.0".into()),
                ENV_PORT => Some("9100".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9100");
    }

    #[test]
    fn test_invalid_port_override_errors() {
        let err = HubConfig::default()
            .with_overrides(|key| (key == ENV_PORT).then(|| "nope".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SWITCHYARD_PORT"));
    }

    #[test]
    fn test_validated_fixes_zero_values() {
        let cfg = HubConfig {
            heartbeat_interval_ms: 0,
            stream_chunk_interval_ms: 0,
            max_connections: 0,
            outbound_queue_size: 0,
            ..HubConfig::default()
        }
        .validated();
        assert_eq!(cfg.heartbeat_interval_ms, 30_000);
        assert_eq!(cfg.stream_chunk_interval_ms, 1_000);
        assert_eq!(cfg.max_connections, 1000);
        assert_eq!(cfg.outbound_queue_size, 256);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let cfg = HubConfig::load("/nonexistent/switchyard.json").unwrap();
        assert_eq!(cfg.max_connections, HubConfig::default().max_connections);
    }

    #[test]
    fn test_load_reads_file() {
        let path = std::env::temp_dir().join(format!("switchyard-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"maxConnections": 7, "heartbeatIntervalMs": 500}"#).unwrap();

        let cfg = HubConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(cfg.max_connections, 7);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_derived_configs() {
        let cfg = HubConfig {
            max_connections: 3,
            outbound_queue_size: 8,
            stream_chunk_interval_ms: 50,
            stream_max_chunks: 2,
            max_message_size: 64,
            ..HubConfig::default()
        };
        assert_eq!(cfg.registry_config().max_connections, 3);
        assert_eq!(cfg.registry_config().outbound_queue_size, 8);
        assert_eq!(cfg.stream_config().chunk_interval, Duration::from_millis(50));
        assert_eq!(cfg.stream_config().max_chunks, 2);
        assert_eq!(cfg.transport_config().max_message_size, 64);
    }
}
