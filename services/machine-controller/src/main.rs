//! Incus machine controller
//!
//! Keeps one Incus VM per `IncusMachine` object and releases each object
//! only after its VM is confirmed deleted.
//!
//! ## Architecture
//!
//! - **Object store**: SQLite file under the data directory
//! - **Backend**: Incus REST API over the local unix socket
//! - **Workers**: one periodic reconcile loop per kind

use std::sync::Arc;

use anyhow::{Context as _, Result};
use capi_incus_controller::api::{IncusCluster, IncusMachine};
use capi_incus_controller::backend::{IncusClient, InstanceBackend};
use capi_incus_controller::config::Config;
use capi_incus_controller::store::{ObjectStore, SqliteStore};
use capi_incus_controller::{ClusterReconciler, MachineReconciler, Worker, WorkerConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        incus_socket = %config.incus_socket.display(),
        data_dir = %config.data_dir.display(),
        resync_interval_secs = config.resync_interval_secs,
        "Starting Incus machine controller"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    let store = Arc::new(SqliteStore::open(config.store_path())?);
    let backend = Arc::new(IncusClient::new(&config.incus_socket));

    let worker_config = WorkerConfig {
        resync_interval: config.resync_interval(),
        reconcile_timeout: config.reconcile_timeout(),
        ..WorkerConfig::default()
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let machine_store: Arc<dyn ObjectStore<IncusMachine>> = store.clone();
    let machine_worker = Worker::new(
        Arc::clone(&machine_store),
        Arc::new(MachineReconciler::new(machine_store, backend.clone())),
        worker_config.clone(),
    );
    let machine_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { machine_worker.run(shutdown_rx).await }
    });

    let cluster_store: Arc<dyn ObjectStore<IncusCluster>> = store;
    let cluster_worker = Worker::new(
        Arc::clone(&cluster_store),
        Arc::new(ClusterReconciler::new(cluster_store)),
        worker_config,
    );
    let cluster_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { cluster_worker.run(shutdown_rx).await }
    });

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    // Signal shutdown to all workers; in-flight backend calls are cancelled
    let _ = shutdown_tx.send(true);

    for (name, handle) in [("machine", machine_handle), ("cluster", cluster_handle)] {
        if let Err(e) = handle.await {
            error!(worker = name, error = %e, "Worker task panicked");
        }
    }

    if let Err(e) = backend.close().await {
        warn!(error = %e, "Failed to close Incus session");
    }

    info!("Machine controller shutdown complete");
    Ok(())
}
