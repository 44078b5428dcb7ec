//! Edge Cache - a caching reverse proxy
//!
//! Runs the proxy listener and the admin API side by side.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edge_cache::api::{create_router, AppState};
use edge_cache::cache::CacheBackend;
use edge_cache::proxy::{create_proxy_router, OriginTable, ProxyState};
use edge_cache::stats::{Collector, Stats};
use edge_cache::tasks::{spawn_cleanup_task, StoreQueue};
use edge_cache::Config;

/// Time pending cache writes get to finish after the listeners close
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration
/// 3. Create the cache store, the store queue and the expiry sweeper
/// 4. Serve the proxy and admin listeners
/// 5. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edge_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Edge Cache");

    let config = Config::from_env().context("unable to load configuration")?;
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: cache={}, backends={}, proxy port={}, api port={}",
        config.cache.kind,
        config.proxy.backends.len(),
        config.proxy.port,
        config.api.port
    );

    let stats = Arc::new(Stats::new());
    let collector: Arc<dyn Collector> = stats.clone();

    let backend = CacheBackend::from_config(&config.cache, collector.clone())
        .context("unable to create cache store")?;
    info!("{} cache store initialized", backend.kind());

    let cleanup_handle = match &backend {
        CacheBackend::Memory(store) if store.options().cleanup_interval > 0 => Some(
            spawn_cleanup_task(store.clone(), store.options().cleanup_interval),
        ),
        _ => None,
    };

    let (queue, store_workers) = StoreQueue::spawn(
        backend.store(),
        collector.clone(),
        config.proxy.store_workers,
        config.proxy.store_queue,
    );

    let origins = OriginTable::from_backends(&config.proxy.backends)?;
    let proxy_state = ProxyState::new(
        backend.store(),
        origins,
        queue,
        collector,
        &config.proxy.scheme,
    )?;
    let admin_state = AppState::new(backend.store(), stats, backend.kind());

    let proxy_addr = listen_addr(&config.proxy.address, config.proxy.port)?;
    let api_addr = listen_addr(&config.api.address, config.api.port)?;
    let proxy_listener = TcpListener::bind(proxy_addr)
        .await
        .with_context(|| format!("unable to bind proxy listener on {}", proxy_addr))?;
    let api_listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("unable to bind admin listener on {}", api_addr))?;
    info!("Proxy listening on http://{}", proxy_addr);
    info!("Admin API listening on http://{}", api_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let proxy = axum::serve(proxy_listener, create_proxy_router(proxy_state))
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
        .into_future();
    let admin = axum::serve(api_listener, create_router(admin_state))
        .with_graceful_shutdown(wait_for(shutdown_rx))
        .into_future();
    tokio::try_join!(proxy, admin).context("server error")?;

    if let Some(handle) = cleanup_handle {
        handle.abort();
        warn!("Expiry sweeper aborted");
    }

    // The listeners own the last store queue senders, so the workers now
    // drain what is left and stop.
    let drain = drain_workers(store_workers);
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Pending cache writes abandoned");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn listen_addr(address: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let ip = address
        .parse()
        .with_context(|| format!("invalid listen address {}", address))?;
    Ok(SocketAddr::new(ip, port))
}

async fn drain_workers(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
}
