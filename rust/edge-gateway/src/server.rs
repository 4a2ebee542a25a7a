//! Startup sequence and router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware::from_fn_with_state, Router};
use tokio::task::JoinHandle;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::accounts::MemoryAdminStore;
use crate::config::{AppConfig, ConfigurationError, SessionBackend};
use crate::events::{BroadcastRelay, NotificationHub};
use crate::gateway::{
    self,
    session_store::{MemorySessionStore, RedisSessionStore, SessionStore},
};
use crate::logging::OpTimer;
use crate::registry::{
    listener::{run_sweeper, DiscoveryListener},
    ServiceRegistry,
};
use crate::retry::{with_backoff, RetryPolicy};
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// Edge Gateway version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

const TOTAL_STEPS: u32 = 6;

/// A ready-to-serve gateway.
#[derive(Debug)]
pub struct Gateway {
    pub router: Router,
    pub state: AppState,
    /// Hub, discovery, sweeper and relay tasks.
    pub background: Vec<JoinHandle<()>>,
}

/// Connect to every mandatory dependency, start the background tasks and
/// build the router.
///
/// Fails when a dependency is still unreachable after the retry budget.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Gateway> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🚀 Edge Gateway v{VERSION}"),
        format!(
            "Sessions: {:?} | Discovery: {} | Broadcast: {}",
            config.session.backend, config.discovery.enabled, config.broadcast.enabled
        )
    );

    // [1/6] Redis client
    let step_timer = OpTimer::new("server", "redis_client");
    let redis = match config.redis.url.as_deref() {
        Some(url) if config.needs_redis() => {
            let client = redis::Client::open(url).map_err(|e| {
                ConfigurationError::invalid(
                    format!("redis.url is not a valid Redis URL: {e}"),
                    "Use the form redis://host:port/db",
                )
            })?;
            log_init_step!(1, TOTAL_STEPS, "Redis", format!("💾 {url}"));
            Some(client)
        }
        _ => {
            log_init_step!(1, TOTAL_STEPS, "Redis", "💾 Not used");
            None
        }
    };
    step_timer.finish();

    // [2/6] Session store
    let step_timer = OpTimer::new("server", "session_store");
    let ttl = config.session.ttl();
    let sessions: Arc<dyn SessionStore> = match (&config.session.backend, &redis) {
        (SessionBackend::Redis, Some(client)) => {
            let url = config.redis.url.as_deref().unwrap_or_default();
            let conn = init_redis(client, url, &config.retry).await?;
            log_init_step!(
                2,
                TOTAL_STEPS,
                "Session Store",
                format!("🔑 Redis, ttl {}s", ttl.as_secs())
            );
            Arc::new(RedisSessionStore::new(conn, ttl))
        }
        (SessionBackend::Redis, None) => {
            return Err(ConfigurationError::missing_required(
                "redis.url",
                "session storage",
                "REDIS_URL",
            )
            .into());
        }
        (SessionBackend::Memory, _) => {
            log_init_warning!("In-memory session store: sessions are lost on restart");
            log_init_step!(
                2,
                TOTAL_STEPS,
                "Session Store",
                format!("🔑 Memory, ttl {}s", ttl.as_secs())
            );
            Arc::new(MemorySessionStore::new(ttl))
        }
    };
    step_timer.finish();

    // [3/6] Notification hub
    let step_timer = OpTimer::new("server", "notification_hub");
    let (hub, hub_task) = NotificationHub::start(config.broadcast.queue_capacity);
    let mut background = vec![hub_task];
    log_init_step!(
        3,
        TOTAL_STEPS,
        "Notification Hub",
        format!("📣 queue capacity {}", config.broadcast.queue_capacity)
    );
    step_timer.finish();

    // [4/6] Service registry and discovery
    let step_timer = OpTimer::new("server", "service_registry");
    let registry = Arc::new(ServiceRegistry::new());
    match (&redis, config.discovery.enabled) {
        (Some(client), true) => {
            let listener = DiscoveryListener::new(
                client.clone(),
                config.discovery.channel.clone(),
                config.retry,
                Arc::clone(&registry),
            );
            let pubsub = listener.subscribe().await.map_err(|e| {
                ConfigurationError::connection_failed(
                    "Redis pub/sub",
                    config.discovery.channel.clone(),
                    e.to_string(),
                    "Ensure Redis is running and REDIS_URL is correct",
                )
            })?;
            background.push(tokio::spawn(listener.run(pubsub)));
            background.push(tokio::spawn(run_sweeper(
                Arc::clone(&registry),
                config.discovery.sweep_interval(),
            )));
            log_init_step!(
                4,
                TOTAL_STEPS,
                "Service Registry",
                format!("🧭 channel `{}`", config.discovery.channel)
            );
        }
        _ => {
            log_init_warning!("Service discovery disabled: no request will be proxied");
            log_init_step!(4, TOTAL_STEPS, "Service Registry", "🧭 Static (empty)");
        }
    }
    step_timer.finish();

    // [5/6] Broadcast relay
    let step_timer = OpTimer::new("server", "broadcast_relay");
    match (&redis, config.broadcast.enabled) {
        (Some(client), true) => {
            let relay = BroadcastRelay::new(
                client.clone(),
                config.broadcast.queue.clone(),
                config.broadcast.poll_timeout(),
                config.retry,
                hub.clone(),
            );
            let conn = relay.connect().await.map_err(|e| {
                ConfigurationError::connection_failed(
                    "Redis broadcast queue",
                    config.broadcast.queue.clone(),
                    e.to_string(),
                    "Ensure Redis is running and REDIS_URL is correct",
                )
            })?;
            background.push(tokio::spawn(relay.run(conn)));
            log_init_step!(
                5,
                TOTAL_STEPS,
                "Broadcast Relay",
                format!("📨 queue `{}`", config.broadcast.queue)
            );
        }
        _ => {
            log_init_step!(5, TOTAL_STEPS, "Broadcast Relay", "📨 Disabled");
        }
    }
    step_timer.finish();

    // [6/6] Router
    let step_timer = OpTimer::new("server", "router");
    let state = AppState::new(
        config,
        sessions,
        Arc::new(MemoryAdminStore::new()),
        registry,
        hub,
    )?;
    let router = build_router(state.clone());
    log_init_step!(6, TOTAL_STEPS, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("Edge Gateway created successfully");

    Ok(Gateway {
        router,
        state,
        background,
    })
}

/// Build the router around an assembled state.
///
/// Requests pass the trace layer, then identity resolution, then dispatch,
/// which proxies registered paths and hands the rest to the local routes.
/// The server timeout wraps the local routes only; proxied calls are bounded
/// by the upstream client.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.timeout_secs);

    gateway::create_router()
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            gateway::dispatch::dispatch_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            gateway::auth::identity_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connect the session store's Redis connection, retrying with backoff.
async fn init_redis(
    client: &redis::Client,
    url: &str,
    retry: &RetryPolicy,
) -> Result<redis::aio::ConnectionManager, ConfigurationError> {
    let timer = OpTimer::new("redis", "connect");
    let result = with_backoff(retry, "connect to session store", || {
        redis::aio::ConnectionManager::new(client.clone())
    })
    .await;
    timer.finish_with_result(result.as_ref());

    result.map_err(|e| {
        ConfigurationError::connection_failed(
            "Redis",
            url,
            e.to_string(),
            "Ensure Redis is running and REDIS_URL is correct",
        )
    })
}
