//! Agent lifecycle: two poll tickers, a report ticker and the worker pool.

use crate::config::AgentConfig;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::pool::WorkerPool;
use crate::sampler::Sampler;
use crate::transport::{outbound_ip, GrpcTransport, HttpTransport, Transport};
use anyhow::{Context, Result};
use oxmetrics_collector::host::HostCollector;
use oxmetrics_collector::runtime::RuntimeCollector;
use oxmetrics_collector::Collector;
use oxmetrics_common::cipher::Encryptor;
use oxmetrics_common::hashing::Hasher;
use oxmetrics_common::ticker::run_every;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

async fn resolve_real_ip(config: &AgentConfig) -> Option<IpAddr> {
    if let Some(ip) = config.real_ip {
        return Some(ip);
    }
    match outbound_ip(config.target()).await {
        Ok(ip) => {
            tracing::info!(ip = %ip, "Discovered outbound address");
            Some(ip)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not discover outbound address, X-Real-IP not sent");
            None
        }
    }
}

/// Builds the transport the config asks for.
pub async fn build_transport(config: &AgentConfig) -> Result<Arc<dyn Transport>> {
    let hasher = Hasher::new(config.key.as_deref().unwrap_or_default());
    let real_ip = resolve_real_ip(config).await;

    if let Some(addr) = &config.grpc_address {
        if config.crypto_key.is_some() {
            tracing::warn!("Payload encryption is not applied to gRPC reports");
        }
        let transport = GrpcTransport::connect_lazy(addr, hasher, real_ip)
            .with_context(|| format!("Invalid gRPC address '{addr}'"))?;
        return Ok(Arc::new(transport));
    }

    let encryptor = match &config.crypto_key {
        Some(path) => Some(Arc::new(Encryptor::load(path).with_context(|| {
            format!("Failed to load public key '{}'", path.display())
        })?)),
        None => None,
    };
    Ok(Arc::new(HttpTransport::new(
        &config.address,
        hasher,
        encryptor,
        real_ip,
    )))
}

/// Runs `collector` every `period`, handing each successful read to `record`.
fn spawn_poller<C, F, Fut>(
    mut collector: C,
    period: Duration,
    cancel: CancellationToken,
    record: F,
) -> JoinHandle<()>
where
    C: Collector + 'static,
    F: Fn(Vec<oxmetrics_common::types::Metric>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run_every(period, cancel, move || {
        let read = match collector.collect() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!(collector = collector.name(), error = %e, "Collection failed");
                None
            }
        };
        let pending = read.map(&record);
        async move {
            if let Some(pending) = pending {
                pending.await;
            }
        }
    }))
}

/// Samples and reports until `cancel` fires, then lets queued reports
/// finish.
pub async fn run(config: AgentConfig, cancel: CancellationToken) -> Result<()> {
    let transport = build_transport(&config).await?;
    tracing::info!(
        transport = transport.name(),
        target = config.target(),
        workers = config.rate_limit,
        "Reporting configured"
    );

    let sampler = Arc::new(Sampler::new());
    let dispatcher = Dispatcher::new(sampler.clone(), transport);
    let mut pool = WorkerPool::<DispatchError>::new(config.rate_limit)?;
    let mut results = pool
        .take_results()
        .context("Worker pool results already taken")?;
    let outcomes = tokio::spawn(async move {
        while let Some(outcome) = results.recv().await {
            if let Err(e) = outcome {
                tracing::error!(error = %e, "Report failed");
            }
        }
    });

    let runtime = spawn_poller(
        RuntimeCollector::new().context("Failed to start runtime collector")?,
        config.poll_interval,
        cancel.clone(),
        {
            let sampler = sampler.clone();
            move |metrics| {
                let sampler = sampler.clone();
                async move { sampler.record_poll(metrics).await }
            }
        },
    );
    let host = spawn_poller(
        HostCollector::new(),
        config.poll_interval,
        cancel.clone(),
        {
            let sampler = sampler.clone();
            move |metrics| {
                let sampler = sampler.clone();
                async move { sampler.record(metrics).await }
            }
        },
    );

    let pool_ref = &pool;
    run_every(config.report_interval, cancel.clone(), || {
        let dispatcher = dispatcher.clone();
        async move {
            if let Err(e) = dispatcher.report(pool_ref).await {
                tracing::error!(error = %e, "Could not queue report");
            }
        }
    })
    .await;

    tracing::info!("Stopping agent");
    for (name, handle) in [("runtime", runtime), ("host", host)] {
        if let Err(e) = handle.await {
            tracing::error!(poller = name, error = %e, "Poller task failed");
        }
    }
    pool.shutdown().await;
    outcomes.await.context("Result task failed")?;
    Ok(())
}
