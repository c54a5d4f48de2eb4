//! Order Coordinator - holds signed orders until their prerequisite
//! transactions resolve, then submits them to the matching service.
//!
//! Each order waits on its token approval and native-currency wrap, is
//! rejected if the quote went stale in the meantime, and otherwise is posted
//! exactly once. Every order ends in a single terminal queue status.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod coordination;
mod error;
mod events;
mod ledger;
mod metrics;
mod submission;

use chain::ChainManager;
use config::Settings;
use coordination::{CoordinatorService, OrderCoordinator, StalenessPolicy};
use events::BroadcastEventSink;
use ledger::{Ledger, MemoryLedger, PgLedger};
use metrics::MetricsServer;
use submission::HttpOrderSubmitter;

/// How long in-flight coordinations get to record `AppClosed` on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Order Coordinator v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let ledger: Arc<dyn Ledger> = match settings.database {
        Some(ref database) => {
            let ledger = PgLedger::new(database).await?;
            info!("Database connection established");
            ledger.run_migrations().await?;
            info!("Database migrations complete");
            Arc::new(ledger)
        }
        None => {
            warn!("No database configured, orders are kept in memory only");
            Arc::new(MemoryLedger::new())
        }
    };

    let policy = StalenessPolicy::new(settings.coordinator.staleness_threshold())
        .with_max_prerequisite_wait(settings.coordinator.max_prerequisite_wait());
    let coordinator = OrderCoordinator::new(
        ledger.clone(),
        Arc::new(HttpOrderSubmitter::new(&settings.submission)?),
        Arc::new(BroadcastEventSink::default()),
        policy,
    );
    let service = Arc::new(CoordinatorService::new(Arc::new(coordinator)));

    // Nothing from a previous process is still waiting on our behalf
    let closed = service.recover_interrupted().await?;
    info!("Recovery complete ({} interrupted orders closed)", closed);

    let chain_manager = Arc::new(ChainManager::new(&settings, ledger.clone())?);
    info!("Chain connections initialized");

    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let service = service.clone();
        let chain_manager = chain_manager.clone();
        async move {
            if let Err(e) = api::run_server(config, service, chain_manager).await {
                error!("API server error: {}", e);
            }
        }
    });

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let watcher_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        async move {
            if let Err(e) = chain_manager.run_watchers().await {
                error!("Receipt watcher error: {}", e);
            }
        }
    });

    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let ledger = ledger.clone();
        let service = service.clone();
        let interval = settings.coordinator.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let mut healthy = true;
                for (chain_id, chain_ok) in chain_manager.health_check().await {
                    if !chain_ok {
                        warn!("Chain {} health check failed", chain_id);
                        healthy = false;
                    } else if let Ok(provider) = chain_manager.get_provider(chain_id) {
                        metrics::record_block_height(chain_id, provider.last_block());
                    }
                }

                if let Err(e) = ledger.health_check().await {
                    warn!("Ledger health check failed: {}", e);
                    healthy = false;
                }

                metrics::record_in_flight(service.in_flight_count());
                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Order Coordinator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Stop accepting orders before cancelling the ones in flight
    api_handle.abort();
    let remaining = service.shutdown(SHUTDOWN_GRACE).await;
    if remaining > 0 {
        warn!("{} orders did not settle before shutdown", remaining);
    }
    chain_manager.stop().await;

    watcher_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Order Coordinator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,order_coordinator=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

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
            Ok(mut stream) => {
                stream.recv().await;
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
