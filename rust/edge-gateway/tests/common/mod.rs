//! Shared helpers for the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Response, Router};

use edge_gateway::accounts::{MemoryAdminStore, NewAdmin};
use edge_gateway::config::{AppConfig, SessionBackend};
use edge_gateway::events::NotificationHub;
use edge_gateway::gateway::session_store::MemorySessionStore;
use edge_gateway::registry::ServiceRegistry;
use edge_gateway::AppState;

pub const SIGNING_KEY: &str = "integration test signing key";
pub const PASSWORD: &str = "correct horse";

/// Configuration that needs no external services.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.session.signing_key = Some(SIGNING_KEY.to_string());
    config.session.backend = SessionBackend::Memory;
    config.discovery.enabled = false;
    config.broadcast.enabled = false;
    config.proxy.timeout_secs = 2;
    config
}

/// State backed by in-memory stores, with a running hub.
pub fn test_state() -> AppState {
    test_state_with(test_config())
}

pub fn test_state_with(config: AppConfig) -> AppState {
    let (hub, _task) = NotificationHub::start(16);
    AppState::new(
        config.clone(),
        Arc::new(MemorySessionStore::new(config.session.ttl())),
        Arc::new(MemoryAdminStore::new()),
        Arc::new(ServiceRegistry::new()),
        hub,
    )
    .expect("test config is valid")
}

pub fn new_admin(email: &str, user_name: &str) -> NewAdmin {
    NewAdmin {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        password_conf: PASSWORD.to_string(),
        user_name: user_name.to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
    }
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body is readable");
    String::from_utf8(bytes.to_vec()).expect("body is UTF-8")
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server runs");
    });
    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}
