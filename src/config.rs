//! Server configuration.
//!
//! Defaults, overlaid by an optional YAML file named in `TCP_TO_HTTP_CONFIG`,
//! overlaid by the `LISTEN` environment variable.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::connection::ConnectionSettings;
use crate::http::response::ContentEncoding;

pub const CONFIG_PATH_ENV: &str = "TCP_TO_HTTP_CONFIG";
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub compression: CompressionConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub connection_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub accept_poll_interval_ms: u64,
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            connection_timeout_secs: 30,
            shutdown_grace_secs: 2,
            accept_poll_interval_ms: 1000,
            read_buffer_size: 8,
        }
    }
}

impl ServerConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub encodings: Vec<ContentEncoding>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            encodings: vec![ContentEncoding::Gzip, ContentEncoding::Deflate],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFlavor {
    /// Connections spread across a pool of worker threads.
    #[default]
    MultiThread,
    /// Every connection task on one event-loop thread.
    CurrentThread,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub flavor: RuntimeFlavor,
    pub worker_threads: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads from the environment: the YAML file named by
    /// `TCP_TO_HTTP_CONFIG` if set, then the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var(LISTEN_ENV) {
            cfg.server.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw)?;
        Ok(cfg)
    }

    /// Codings offered during negotiation; empty when compression is off.
    pub fn supported_encodings(&self) -> Vec<ContentEncoding> {
        if !self.compression.enabled {
            return Vec::new();
        }
        self.compression
            .encodings
            .iter()
            .copied()
            .filter(|e| !e.is_identity())
            .collect()
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            timeout: self.server.connection_timeout(),
            read_buffer_size: self.server.read_buffer_size.max(1),
            encodings: self.supported_encodings(),
        }
    }

    pub fn log_level(&self) -> anyhow::Result<tracing::Level> {
        self.logging
            .level
            .parse()
            .with_context(|| format!("unknown log level {:?}", self.logging.level))
    }
}
