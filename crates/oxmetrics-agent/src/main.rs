use anyhow::Result;
use clap::Parser;
use oxmetrics_agent::agent;
use oxmetrics_agent::config::{AgentArgs, AgentConfig};
use oxmetrics_common::shutdown::cancel_on_signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("oxmetrics_agent={level}").parse()?)
        .add_directive(format!("oxmetrics_collector={level}").parse()?)
        .add_directive(format!("oxmetrics_common={level}").parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load(AgentArgs::parse())?;
    init_logging(&config.log_level)?;

    tracing::info!(
        address = %config.address,
        grpc = ?config.grpc_address,
        poll_interval = ?config.poll_interval,
        report_interval = ?config.report_interval,
        rate_limit = config.rate_limit,
        hmac = config.key.is_some(),
        encrypt = config.crypto_key.is_some(),
        "oxmetrics-agent starting"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    agent::run(config, cancel).await?;

    tracing::info!("Agent stopped");
    Ok(())
}
