//! Edge Gateway - authenticated entry point for a fleet of HTTP services
//!
//! The gateway sits in front of backend services that announce themselves at
//! runtime and offers:
//!
//! - **Sessions**: HMAC-signed bearer tokens with state kept in Redis
//! - **Identity propagation**: the verified caller travels upstream in `X-User`
//! - **Dynamic routing**: services register a path pattern and address over
//!   pub/sub, expire when their heartbeat stops, and share load round-robin
//! - **Notifications**: payloads from a broadcast queue fan out to every
//!   connected WebSocket client
//!
//! # Architecture
//!
//! - [`config`]: layered configuration and startup validation
//! - [`gateway`]: tokens, session storage, identity middleware, reverse proxy
//!   and the locally served endpoints
//! - [`registry`]: the live service registry and its discovery listener
//! - [`events`]: the notification hub and the broadcast queue relay
//! - [`accounts`]: admin accounts behind the [`accounts::AdminStore`] trait
//! - [`retry`]: bounded exponential backoff for every external connection
//!
//! # Example
//!
//! ```rust,ignore
//! use edge_gateway::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let gateway = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, gateway.router).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod accounts;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod registry;
pub mod retry;
pub mod server;

use std::sync::Arc;

use crate::accounts::AdminStore;
use crate::config::{AppConfig, ConfigurationError};
use crate::events::NotificationHub;
use crate::gateway::session_store::SessionStore;
use crate::registry::ServiceRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Key used to sign and verify session tokens.
    pub signing_key: Arc<str>,
    /// Session state keyed by token.
    pub sessions: Arc<dyn SessionStore>,
    /// Admin accounts.
    pub admins: Arc<dyn AdminStore>,
    /// Services discovered at runtime.
    pub registry: Arc<ServiceRegistry>,
    /// Handle to the WebSocket fan-out task.
    pub hub: NotificationHub,
    /// Client for proxied requests.
    pub http: reqwest::Client,
}

impl AppState {
    /// Assemble the state from its parts. The signing key and proxy timeout
    /// are taken from `config`.
    pub fn new(
        config: AppConfig,
        sessions: Arc<dyn SessionStore>,
        admins: Arc<dyn AdminStore>,
        registry: Arc<ServiceRegistry>,
        hub: NotificationHub,
    ) -> Result<Self, ConfigurationError> {
        let signing_key: Arc<str> = match config.session.signing_key.as_deref() {
            Some(key) if !key.is_empty() => Arc::from(key),
            _ => {
                return Err(ConfigurationError::missing_required(
                    "session.signing_key",
                    "Signing and verifying session tokens",
                    "SESSION_KEY",
                ))
            }
        };

        let http = gateway::proxy::build_client(config.proxy.timeout()).map_err(|e| {
            ConfigurationError::invalid(
                format!("could not build the upstream HTTP client: {e}"),
                "Check the TLS setup of the host",
            )
        })?;

        Ok(Self {
            config: Arc::new(config),
            signing_key,
            sessions,
            admins,
            registry,
            hub,
            http,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("signing_key", &"<redacted>")
            .field("registry", &self.registry.len())
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}
