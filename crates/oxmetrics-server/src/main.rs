use anyhow::Result;
use clap::Parser;
use oxmetrics_common::shutdown::cancel_on_signal;
use oxmetrics_server::config::{ServerArgs, ServerConfig};
use oxmetrics_server::{logging, server};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load(ServerArgs::parse())?;
    logging::init(&config.log_level)?;

    tracing::info!(
        address = %config.address,
        grpc = ?config.grpc_address,
        store_interval = ?config.store_interval,
        restore = config.restore,
        database = config.database_dsn.is_some(),
        hmac = config.key.is_some(),
        decrypt = config.crypto_key.is_some(),
        trusted_subnet = ?config.trusted_subnet,
        "oxmetrics-server starting"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    server::run(config, cancel).await?;

    tracing::info!("Server stopped");
    Ok(())
}
