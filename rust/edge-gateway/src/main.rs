//! Edge Gateway - Main Entry Point
//!
//! Authenticating reverse proxy with dynamic service discovery and
//! WebSocket notifications.

use clap::Parser;
use mimalloc::MiMalloc;

use edge_gateway::config::{AppConfig, DEFAULT_CONFIG_FILE};
use edge_gateway::logging::{init_from_config, init_tracing};
use edge_gateway::server::create_app;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "edge-gateway")]
#[command(about = "Edge Gateway - sessions, service discovery and notifications")]
#[command(version)]
struct Args {
    /// Host to bind to. Overrides the configuration.
    #[arg(long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Port to listen on. Overrides the configuration.
    #[arg(short, long, env = "GATEWAY_PORT")]
    port: Option<u16>,

    /// Log level. Overrides the configuration.
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Config file path, extension optional.
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "GATEWAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The subscriber is built from the logging section.
    let mut config = match AppConfig::load_from(&args.config) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(args.log_level.as_deref().unwrap_or("info"), args.log_json);
            tracing::error!("{e:#}");
            return Err(e);
        }
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.log_json {
        config.logging.json = true;
    }
    init_from_config(&config.logging);

    tracing::info!("Starting Edge Gateway v{}", env!("CARGO_PKG_VERSION"));

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let addr = config.server.bind_addr();
    tracing::info!(config = %args.config, "Configuration loaded");

    let gateway = match create_app(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!("Startup failed: {e:#}");
            return Err(e);
        }
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, gateway.router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in gateway.background {
        task.abort();
    }
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
