//! Pruner - leader-elected retention pruner for the autoscaler metric stores
//!
//! Redundant instances race for one lease; the winner runs the per-store
//! pruning schedules, everyone else waits in line. Losing the lease is fatal
//! by design: the supervisor restarts the process and it re-enters the race.

mod config;
mod error;
mod lease;
mod lock;
mod orchestrator;
mod routes;
mod store;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::PrunerError;
use crate::lease::PgLeaseClient;
use crate::lock::LockMonitor;
use crate::orchestrator::{Orchestrator, PruningJob};
use crate::store::{Prune, Store, StoreKind};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pruner=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    // 1. Configuration: open, parse, and validation failures are distinct
    //    and all fatal before anything else starts.
    let config_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: pruner <config-file>");
            return 1;
        }
    };

    let config = match Config::load(Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => return fatal(&e),
    };

    info!(
        "pruner v{} starting, config {}",
        env!("CARGO_PKG_VERSION"),
        config_path
    );

    // 2. Store connections, fixed order; any one failing aborts startup
    //    before the lease is ever contested.
    let mut stores: Vec<Arc<Store>> = Vec::with_capacity(3);
    for (kind, store_config) in [
        (StoreKind::InstanceMetrics, &config.instance_metrics_db),
        (StoreKind::AppMetrics, &config.app_metrics_db),
        (StoreKind::ScalingEngine, &config.scaling_engine_db),
    ] {
        match Store::connect(kind, store_config).await {
            Ok(store) => stores.push(Arc::new(store)),
            Err(e) => {
                close_stores(&stores).await;
                return fatal(&e);
            }
        }
    }

    // 3. Lock monitor over the lease backend.
    let lease_client = match PgLeaseClient::connect(&config.lock).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            close_stores(&stores).await;
            return fatal(&e);
        }
    };
    info!(key = %config.lock.key, owner = %lease_client.owner(), "lock client ready");

    let (monitor, lease_rx) = LockMonitor::new(
        lease_client.clone(),
        config.lock_retry_interval(),
        config.lock_ttl(),
    );

    // Health listener reports leadership to the supervisor; optional.
    if config.health.port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.health.port));
        let router = routes::health::router(lease_rx.clone());
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!(addr = %addr, "health endpoint listening");
                    if let Err(e) = axum::serve(listener, router).await {
                        error!(error = %e, "health endpoint stopped");
                    }
                }
                Err(e) => error!(error = %e, addr = %addr, "failed to bind health endpoint"),
            }
        });
    }

    // Acquisition blocks as long as it takes, but a shutdown signal while
    // still in line exits cleanly without ever starting work.
    tokio::select! {
        _ = monitor.acquire() => {}
        code = shutdown_signal() => {
            info!(event = "shutdown-initiated", "shutdown requested while seeking lock");
            let _ = monitor.release().await;
            close_stores(&stores).await;
            lease_client.close().await;
            return code;
        }
    }

    // 4. Leadership held: start the schedules and the renewal loop.
    let jobs = stores
        .iter()
        .zip([
            &config.instance_metrics_db,
            &config.app_metrics_db,
            &config.scaling_engine_db,
        ])
        .map(|(store, store_config)| PruningJob {
            pruner: store.clone() as Arc<dyn Prune>,
            interval: store_config.refresh_interval(),
        })
        .collect();

    let mut orchestrator = Orchestrator::new(jobs, lease_rx.clone());
    orchestrator.start();
    info!("pruner started");

    let renewer = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.monitor().await })
    };

    // 5./6. Run until the lease is lost (failure exit) or a signal arrives
    //    (graceful exit). Either way the orchestrator drains and every
    //    connection is closed before the process ends.
    let code = tokio::select! {
        _ = lock::lost(lease_rx.clone()) => {
            error!(event = "exited-with-failure", "lock lost, exiting");
            eprintln!("pruner: lock lost, exiting");
            orchestrator.stop().await;
            1
        }
        code = shutdown_signal() => {
            info!(event = "shutdown-initiated", "shutdown requested");
            renewer.abort();
            if let Err(e) = monitor.release().await {
                warn!(error = %e, "failed to release lock during shutdown");
            }
            orchestrator.stop().await;
            code
        }
    };

    renewer.abort();
    close_stores(&stores).await;
    lease_client.close().await;
    code
}

/// Log and print the single-line cause of a fatal startup error.
fn fatal(err: &PrunerError) -> i32 {
    error!(error = %err, "startup failed");
    eprintln!("pruner: {err}");
    1
}

async fn close_stores(stores: &[Arc<Store>]) {
    for store in stores {
        store.close().await;
    }
}

/// Wait for SIGINT or SIGTERM and map it to the conventional exit status,
/// so a supervisor can tell intentional shutdown from failure.
async fn shutdown_signal() -> i32 {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => 130,
        () = terminate => 143,
    }
}
