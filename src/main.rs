//! Egress Pool - Entry Point
//!
//! Builds the proxy store and pool manager, admits seeded proxies and runs
//! the health cycle until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use egress_pool::config::{LogConfig, PoolConfig, StoreBackend};
use egress_pool::models::NewProxy;
use egress_pool::pool::{HealthChecker, HealthCheckerConfig, PoolManagerConfig, RotationPolicy};
use egress_pool::repository::{MemoryProxyStore, PgProxyStore, ProxyStore};
use egress_pool::services::{HealthCycleHandle, HealthCycleService};
use egress_pool::{Config, Database, PoolManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    init_tracing(&config.log);

    info!(
        enabled = config.pool.enabled,
        strategy = %config.pool.rotation_strategy,
        "Starting Egress Pool"
    );

    let (store, db): (Arc<dyn ProxyStore>, Option<Database>) = match config.store {
        StoreBackend::Postgres => {
            let db = Database::new(&config.database)
                .await
                .context("Failed to connect to database")?;

            db.run_migrations()
                .await
                .context("Failed to run database migrations")?;

            info!(
                connections = db.pool().size(),
                idle = db.pool().num_idle(),
                "Connected to database"
            );

            let store: Arc<dyn ProxyStore> = Arc::new(PgProxyStore::new(db.pool().clone()));
            (store, Some(db))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory proxy store, records are lost on exit");
            let store: Arc<dyn ProxyStore> = Arc::new(MemoryProxyStore::new());
            (store, None)
        }
    };

    let prober = Arc::new(HealthChecker::new(HealthCheckerConfig::from(&config.pool)));
    let manager = Arc::new(PoolManager::new(
        store,
        prober,
        RotationPolicy::new(config.pool.rotation_strategy),
        PoolManagerConfig::from(&config.pool),
    ));

    seed_proxies(&manager, &config.pool).await;

    let stats = manager
        .statistics()
        .await
        .context("Failed to read pool statistics")?;
    info!(
        total = stats.total,
        active = stats.active,
        failed = stats.failed,
        "Proxy pool ready"
    );

    // Start health cycle
    let health = if config.pool.enabled {
        let (handle, shutdown) = HealthCycleHandle::new();
        let service = HealthCycleService::new(manager.clone(), config.pool.health_check_interval());
        let task = tokio::spawn(async move {
            service.run(shutdown).await;
        });
        Some((handle, task))
    } else {
        info!("Proxy pool disabled, health cycle not started");
        None
    };

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    if let Some((handle, task)) = health {
        handle.shutdown();
        if let Err(e) = task.await {
            error!("Health cycle task failed: {}", e);
        }
    }

    if let Some(db) = db {
        db.close().await;
    }

    info!("Egress Pool stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("egress_pool={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Admit every proxy listed in `PROXY_SEED`; bad entries are logged and skipped
async fn seed_proxies(manager: &PoolManager, pool: &PoolConfig) {
    for raw in &pool.seed {
        let new = match NewProxy::from_url(raw, pool.default_max_concurrent) {
            Ok(new) => new,
            Err(e) => {
                warn!(entry = %raw, "Skipping seed proxy: {}", e);
                continue;
            }
        };

        match manager.add_proxy(new).await {
            Ok(proxy) => info!(
                proxy_id = proxy.id,
                endpoint = %proxy.endpoint(),
                status = %proxy.status,
                "Seeded proxy"
            ),
            Err(e) => error!(entry = %raw, "Failed to seed proxy: {}", e),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
