//! Configuration management
//!
//! Handles loading of the optional JSON configuration file and applies
//! environment overrides for the gateway endpoint and segment directory.
//! Every field has a default, so the binary runs without a config file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionConfig;
use crate::store::{default_segment_dir, SEGMENT_DIR_ENV};
use crate::wire::TwsConfig;

pub const HOST_ENV: &str = "ORDER_BOOK_HOST";
pub const PORT_ENV: &str = "ORDER_BOOK_PORT";
pub const CLIENT_ID_ENV: &str = "ORDER_BOOK_CLIENT_ID";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env()?;
        Ok(config)
    }

    /// File when given, defaults otherwise; environment overrides either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Config::default();
                config.apply_env()?;
                Ok(config)
            }
        }
    }

    /// Gateway endpoint from the environment
    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var(HOST_ENV) {
            self.gateway.host = host;
        }
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.gateway.port = port
                .parse()
                .with_context(|| format!("{} is not a port: {}", PORT_ENV, port))?;
        }
        if let Ok(client_id) = std::env::var(CLIENT_ID_ENV) {
            self.gateway.client_id = client_id
                .parse()
                .with_context(|| format!("{} is not a client id: {}", CLIENT_ID_ENV, client_id))?;
        }
        if let Ok(dir) = std::env::var(SEGMENT_DIR_ENV) {
            if !dir.is_empty() {
                self.store.segment_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            bail!("gateway.host must not be empty");
        }
        if self.gateway.port == 0 {
            bail!("gateway.port must not be 0");
        }
        if self.gateway.poll_timeout_ms == 0 {
            bail!("gateway.poll_timeout_ms must be positive");
        }
        if self.gateway.connect_attempts == 0 {
            bail!("gateway.connect_attempts must be at least 1");
        }
        if self.store.name.trim().is_empty() {
            bail!("store.name must not be empty");
        }
        if self.queue.name.trim().is_empty() {
            bail!("queue.name must not be empty");
        }
        Ok(())
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig::default()
            .with_poll_timeout(Duration::from_millis(self.gateway.poll_timeout_ms))
            .with_connect_attempts(self.gateway.connect_attempts)
            .with_retry_base_delay(Duration::from_secs(self.gateway.retry_base_delay_secs))
    }

    pub fn tws(&self) -> TwsConfig {
        TwsConfig::default()
            .with_connect_timeout(Duration::from_secs(self.gateway.connect_timeout_secs))
    }

    /// Directory holding the store segment
    pub fn segment_dir(&self) -> PathBuf {
        self.store
            .segment_dir
            .clone()
            .unwrap_or_else(default_segment_dir)
    }

    /// Directory holding the command queue; follows the store by default
    pub fn queue_dir(&self) -> PathBuf {
        self.queue.dir.clone().unwrap_or_else(|| self.segment_dir())
    }
}

/// Broker gateway endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    /// Bounded readiness wait per tick
    pub poll_timeout_ms: u64,
    pub connect_timeout_secs: u64,
    pub connect_attempts: u32,
    pub retry_base_delay_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 7497, // paper trading gateway
            client_id: 0,
            poll_timeout_ms: 500,
            connect_timeout_secs: 10,
            connect_attempts: 1,
            retry_base_delay_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Segment name shared with readers
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            name: "order_book_cache".to_string(),
            segment_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Drop commands left over from a previous session at startup
    pub purge_on_start: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            name: "orders_queue".to_string(),
            dir: None,
            purge_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            dir: PathBuf::from("logs"),
        }
    }
}
