//! Configuration management for the edge gateway.
//!
//! Configuration is layered: built-in defaults, then an optional
//! `config/edge-gateway.{yaml,toml}` file, then `GATEWAY__*` environment
//! variables (`GATEWAY__SESSION__TTL_SECS=600`), then a few well-known
//! variables (`SESSION_KEY`, `REDIS_URL`, `SERVER_ADDR`).
//!
//! # Validation
//!
//! [`AppConfig::load`] runs [`ConfigValidator`] before returning:
//!
//! ```rust,ignore
//! use edge_gateway::config::{AppConfig, ConfigValidator};
//!
//! let config = AppConfig::load_unchecked()?;
//! ConfigValidator::validate(&config)?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Configuration file read by [`AppConfig::load`], extension optional.
pub const DEFAULT_CONFIG_FILE: &str = "config/edge-gateway";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Backoff used for every external connection.
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate configuration from the default file location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load and validate configuration, reading the optional file at `path`
    /// (with or without extension).
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let config = Self::load_unchecked_from(path)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        Self::load_unchecked_from(DEFAULT_CONFIG_FILE)
    }

    /// [`Self::load_unchecked`] with an explicit file path.
    pub fn load_unchecked_from(path: &str) -> anyhow::Result<Self> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;
        app_config.apply_env_overrides()?;
        Ok(app_config)
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(key) = std::env::var("SESSION_KEY") {
            self.session.signing_key = Some(key);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = Some(url);
        }
        if let Ok(addr) = std::env::var("SERVER_ADDR") {
            self.server.set_addr(&addr)?;
        }
        Ok(())
    }

    /// Whether any configured feature needs Redis.
    pub fn needs_redis(&self) -> bool {
        self.session.backend == SessionBackend::Redis
            || self.discovery.enabled
            || self.broadcast.enabled
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for locally handled requests, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse a `host:port` or `:port` address.
    pub fn set_addr(&mut self, addr: &str) -> anyhow::Result<()> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("server address `{addr}` must be host:port"))?;
        self.port = port
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid port in server address `{addr}`: {e}"))?;
        if !host.is_empty() {
            self.host = host.to_string();
        }
        Ok(())
    }
}

/// Where session state lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Redis,
    /// In-process map. Sessions are lost on restart; local development only.
    Memory,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Token signing key. Usually supplied through `SESSION_KEY`.
    pub signing_key: Option<String>,
    /// Inactivity window after which a session expires, in seconds.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub backend: SessionBackend,
}

fn default_session_ttl() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            ttl_secs: default_session_ttl(),
            backend: SessionBackend::default(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: Option<String>,
}

/// Service discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pub/sub channel carrying registration events.
    #[serde(default = "default_discovery_channel")]
    pub channel: String,
    /// Period of the expiry sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_discovery_channel() -> String {
    "Microservices".to_string()
}

fn default_sweep_interval() -> u64 {
    10
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: default_discovery_channel(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl DiscoveryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Broadcast relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Redis list holding payloads for connected clients.
    #[serde(default = "default_broadcast_queue")]
    pub queue: String,
    /// Payloads buffered between the relay and the hub.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a single blocking pop waits, in milliseconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
}

fn default_broadcast_queue() -> String {
    "NewVisitor".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_poll_timeout() -> u64 {
    250
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue: default_broadcast_queue(),
            queue_capacity: default_queue_capacity(),
            poll_timeout_ms: default_poll_timeout(),
        }
    }
}

impl BroadcastConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Reverse proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upper bound for a whole upstream exchange, in seconds.
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

fn default_proxy_timeout() -> u64 {
    30
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_proxy_timeout(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
