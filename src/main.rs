//! Resilient Cache - operator server
//!
//! Serves the cache and breaker registry over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resilient_cache::api::create_router;
use resilient_cache::store::{redact_url, Connector, MemoryBackend, RedisConnector, StoreAdapter};
use resilient_cache::{spawn_cleanup_task, AppState, Config};

/// Main entry point for the operator server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Pick the store: Redis when `REDIS_URL` is set, in-process otherwise
/// 4. Start the TTL sweep for the in-process store
/// 5. Create Axum router with all endpoints
/// 6. Serve until SIGINT/SIGTERM
///
/// The store is connected lazily; a down store does not block startup.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilient_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resilient Cache server");

    let config = Config::from_env();
    info!(
        port = config.server_port,
        breaker_failure_threshold = config.breaker_failure_threshold,
        breaker_reset_timeout_ms = config.breaker_reset_timeout_ms,
        connect_timeout_ms = config.connect_timeout_ms,
        "Configuration loaded"
    );

    let (connector, cleanup_handle): (Arc<dyn Connector>, Option<JoinHandle<()>>) =
        match &config.redis_url {
            Some(url) => {
                let connector = RedisConnector::new(url)
                    .with_context(|| format!("invalid REDIS_URL {}", redact_url(url)))?;
                info!(store = %redact_url(url), "Using Redis store");
                (Arc::new(connector), None)
            }
            None => {
                let backend = MemoryBackend::new(config.memory_max_entries);
                let handle = spawn_cleanup_task(backend.clone(), config.cleanup_interval);
                info!(
                    max_entries = config.memory_max_entries,
                    "REDIS_URL not set, using in-process store"
                );
                (Arc::new(backend), Some(handle))
            }
        };

    let adapter = StoreAdapter::new(connector, config.reconnect_policy());
    let state = AppState::from_config(&config, adapter);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the cleanup task if one is running.
async fn shutdown_signal(cleanup_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = cleanup_handle {
        handle.abort();
        warn!("Cleanup task aborted");
    }
}
