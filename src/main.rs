//! Price feeder entry point
//!
//! Usage: `price-feeder [config-file]`

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use price_feeder::client::{BroadcastSettings, OracleClient, RpcOracleClient};
use price_feeder::config::{FeederConfig, LogConfig};
use price_feeder::oracle::Oracle;

fn init_logging(log: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .with_context(|| format!("invalid log level {:?}", log.level))?;

    match log.format.as_str() {
        "text" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init(),
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        other => bail!("invalid logging format: {}", other),
    }

    Ok(())
}

fn build_client(config: &FeederConfig) -> Result<RpcOracleClient> {
    let broadcast = BroadcastSettings {
        endpoint: config.broadcast.endpoint.clone(),
        chain_id: config.account.chain_id.clone(),
        gas_adjustment: config.broadcast.gas_adjustment,
        gas_prices: config.broadcast.gas_price.clone(),
        fee_granter: config.broadcast.fee_grant_address.clone(),
    };

    RpcOracleClient::new(
        &config.rpc.tmrpc_endpoint,
        &config.rpc.grpc_endpoint,
        config.account.validator.clone(),
        config.account.address.clone(),
        config.rpc_timeout(),
        broadcast,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args().nth(1);
    let config = FeederConfig::load(path.as_deref())?;
    init_logging(&config.log)?;

    tracing::info!(config = %config, "Starting price feeder");

    let client = build_client(&config)?;
    if client.is_dry_run() {
        tracing::warn!("No broadcast endpoint configured, votes will only be logged");
    }
    let client: Arc<dyn OracleClient> = Arc::new(client);

    let oracle = Arc::new(Oracle::new(
        client,
        &config.currency_pairs,
        config.provider_timeout(),
        config.deviations()?,
        config.endpoints()?,
    )?);

    let cancel = CancellationToken::new();
    let ticker = {
        let oracle = Arc::clone(&oracle);
        let cancel = cancel.clone();
        tokio::spawn(async move { oracle.start(cancel).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    oracle.stop().await;
    ticker.await.context("Oracle task panicked")?;

    Ok(())
}
