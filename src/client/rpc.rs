//! Tendermint RPC height and external-signer broadcast

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{grpc, OracleClient, OracleMsg};
use crate::oracle::param::OracleParams;

/// Wait between height checks while retrying a broadcast
const BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How unsigned messages reach the signer
#[derive(Debug, Clone, Default)]
pub struct BroadcastSettings {
    /// Signer URL; `None` logs messages instead of sending them
    pub endpoint: Option<String>,
    pub chain_id: String,
    pub gas_adjustment: f64,
    pub gas_prices: String,
    pub fee_granter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    result: StatusResult,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: String,
}

#[derive(Debug, Serialize)]
struct BroadcastRequest<'a> {
    chain_id: &'a str,
    timeout_height: i64,
    gas_adjustment: f64,
    gas_prices: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_granter: Option<&'a str>,
    msgs: Vec<&'a OracleMsg>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    raw_log: String,
}

fn parse_height(status: &StatusResponse) -> Result<i64> {
    let raw = &status.result.sync_info.latest_block_height;
    raw.parse::<i64>()
        .with_context(|| format!("Invalid block height {:?}", raw))
}

/// [`OracleClient`] over Tendermint RPC, gRPC and an external signer
pub struct RpcOracleClient {
    http: Client,
    tmrpc_endpoint: String,
    grpc_endpoint: String,
    validator: String,
    feeder: String,
    broadcast: BroadcastSettings,
}

impl RpcOracleClient {
    pub fn new(
        tmrpc_endpoint: &str,
        grpc_endpoint: &str,
        validator: String,
        feeder: String,
        rpc_timeout: Duration,
        broadcast: BroadcastSettings,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(rpc_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            tmrpc_endpoint: tmrpc_endpoint.trim_end_matches('/').to_string(),
            grpc_endpoint: grpc_endpoint.to_string(),
            validator,
            feeder,
            broadcast,
        })
    }

    /// True when messages are only logged.
    pub fn is_dry_run(&self) -> bool {
        self.broadcast.endpoint.is_none()
    }

    async fn submit(&self, endpoint: &str, request: &BroadcastRequest<'_>) -> Result<String> {
        let response = self
            .http
            .post(endpoint)
            .json(request)
            .send()
            .await
            .context("Failed to reach broadcast endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Broadcast rejected: {} - {}", status, text);
        }

        let body: BroadcastResponse = response
            .json()
            .await
            .context("Failed to decode broadcast response")?;

        if body.code != 0 {
            bail!("tx failed with code {}: {}", body.code, body.raw_log);
        }
        Ok(body.txhash)
    }
}

#[async_trait]
impl OracleClient for RpcOracleClient {
    async fn chain_height(&self) -> Result<i64> {
        let url = format!("{}/status", self.tmrpc_endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        if !response.status().is_success() {
            bail!("Status request failed: {}", response.status());
        }

        let status: StatusResponse = response
            .json()
            .await
            .context("Failed to decode status response")?;
        parse_height(&status)
    }

    async fn broadcast_tx(
        &self,
        next_height: i64,
        timeout_blocks: i64,
        msg: OracleMsg,
    ) -> Result<()> {
        let timeout_height = next_height + timeout_blocks;

        let Some(endpoint) = self.broadcast.endpoint.as_deref() else {
            tracing::info!(
                kind = msg.kind(),
                timeout_height,
                msg = %serde_json::to_string(&msg)?,
                "Dry run, message not broadcast"
            );
            return Ok(());
        };

        let request = BroadcastRequest {
            chain_id: &self.broadcast.chain_id,
            timeout_height,
            gas_adjustment: self.broadcast.gas_adjustment,
            gas_prices: &self.broadcast.gas_prices,
            fee_granter: self.broadcast.fee_granter.as_deref(),
            msgs: vec![&msg],
        };

        let mut last_check_height = 0;
        loop {
            let height = self.chain_height().await?;
            if height > timeout_height {
                bail!(
                    "broadcast timed out: height {} passed timeout height {}",
                    height,
                    timeout_height
                );
            }

            // one attempt per block
            if height <= last_check_height {
                tokio::time::sleep(BLOCK_POLL_INTERVAL).await;
                continue;
            }
            last_check_height = height;

            match self.submit(endpoint, &request).await {
                Ok(txhash) => {
                    tracing::info!(kind = msg.kind(), txhash = %txhash, height, "Broadcast succeeded");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        kind = msg.kind(),
                        height,
                        error = %e,
                        "Broadcast failed, retrying next block"
                    );
                }
            }
        }
    }

    async fn query_params(&self) -> Result<OracleParams> {
        grpc::query_params(&self.grpc_endpoint).await
    }

    fn validator_addr(&self) -> String {
        self.validator.clone()
    }

    fn feeder_addr(&self) -> String {
        self.feeder.clone()
    }
}
