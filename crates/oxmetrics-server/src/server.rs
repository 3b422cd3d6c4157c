//! Server lifecycle: storage bootstrap, listeners, the snapshot ticker and
//! graceful shutdown.

use crate::app::build_http_app;
use crate::config::ServerConfig;
use crate::grpc::MetricsService;
use crate::state::AppState;
use anyhow::{Context, Result};
use oxmetrics_common::ticker::run_every;
use oxmetrics_storage::database::DatabasePersister;
use oxmetrics_storage::file::FilePersister;
use oxmetrics_storage::memory::MetricStore;
use oxmetrics_storage::Persister;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// How long in-flight requests may run after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Opens the configured persister: the database when a DSN is set, else the
/// snapshot file, else none.
pub async fn open_persister(config: &ServerConfig) -> Result<Option<Arc<dyn Persister>>> {
    if let Some(dsn) = &config.database_dsn {
        let persister = DatabasePersister::connect(dsn)
            .await
            .context("Failed to open database")?;
        return Ok(Some(Arc::new(persister)));
    }
    Ok(config
        .file_storage_path
        .as_ref()
        .map(|path| Arc::new(FilePersister::new(path)) as Arc<dyn Persister>))
}

/// Builds the store and, when enabled, restores it. A failed restore is
/// logged and the server starts empty.
pub async fn build_store(config: &ServerConfig) -> Result<Arc<MetricStore>> {
    let persister = open_persister(config).await?;
    match &persister {
        Some(p) => tracing::info!(backend = p.name(), "Persistence enabled"),
        None => tracing::info!("Persistence disabled"),
    }
    let store = MetricStore::new(persister).with_sync_snapshots(config.sync_snapshots());
    if config.restore {
        if let Err(e) = store.restore().await {
            tracing::error!(error = %e, "Restore failed, starting with an empty store");
        }
    }
    Ok(Arc::new(store))
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("Failed to resolve {addr}"))?
        .next()
        .with_context(|| format!("No address for {addr}"))
}

/// Binds the configured HTTP address and runs until `cancel` fires.
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    serve(config, listener, cancel).await
}

/// Runs the server on an already bound HTTP listener until `cancel` fires,
/// then drains requests, takes a final snapshot and closes the persister.
pub async fn serve(
    config: ServerConfig,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<()> {
    let store = build_store(&config).await?;
    let state = AppState::new(config.clone(), store.clone())?;
    let http_addr = listener.local_addr()?;

    let ticker = (!config.sync_snapshots() && store.persister().is_some()).then(|| {
        let store = store.clone();
        tokio::spawn(run_every(
            config.store_interval,
            cancel.child_token(),
            move || {
                let store = store.clone();
                async move {
                    if let Err(e) = store.snapshot().await {
                        tracing::error!(error = %e, "Scheduled snapshot failed");
                    }
                }
            },
        ))
    });

    let grpc = match &config.grpc_address {
        Some(addr) => {
            let addr = resolve(addr).await?;
            let service = MetricsService::new(
                state.controller.clone(),
                state.hasher.clone(),
                state.trusted_subnet,
            )
            .into_server();
            tracing::info!(grpc = %addr, "gRPC listener starting");
            Some(tokio::spawn(
                tonic::transport::Server::builder()
                    .add_service(service)
                    .serve_with_shutdown(addr, cancel.clone().cancelled_owned()),
            ))
        }
        None => None,
    };

    let app = build_http_app(state);
    tracing::info!(
        http = %http_addr,
        store_interval = ?config.store_interval,
        sync_snapshots = config.sync_snapshots(),
        "Server started"
    );
    let mut http = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .into_future(),
    );

    let stopped_early = tokio::select! {
        result = &mut http => Some(result),
        _ = cancel.cancelled() => None,
    };
    let http_result = match stopped_early {
        Some(result) => {
            cancel.cancel();
            result
        }
        None => {
            tracing::info!("Shutting down gracefully");
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut http).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(grace = ?SHUTDOWN_GRACE, "Grace period elapsed, aborting open connections");
                    http.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    if let Some(grpc) = grpc {
        match tokio::time::timeout(SHUTDOWN_GRACE, grpc).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "gRPC server error"),
            Ok(Err(e)) => tracing::error!(error = %e, "gRPC task failed"),
            Err(_) => tracing::warn!("gRPC server did not stop within the grace period"),
        }
    }
    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }

    if let Err(e) = store.snapshot().await {
        tracing::error!(error = %e, "Final snapshot failed");
    }
    if let Err(e) = store.close().await {
        tracing::error!(error = %e, "Failed to close persister");
    }

    http_result
        .context("HTTP server task failed")?
        .context("HTTP server error")?;
    Ok(())
}
