//! Configuration sections

use serde::Deserialize;

/// A pair to price and the providers serving it
#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyPairConfig {
    pub base: String,
    pub quote: String,
    /// Provider names ("binance", "osmosis", ...)
    pub providers: Vec<String>,
}

/// Per-base deviation threshold override, in standard deviations
#[derive(Debug, Clone, Deserialize)]
pub struct DeviationConfig {
    pub base: String,
    /// Decimal string, at most 3.0
    pub threshold: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub chain_id: String,
    /// Feeder account (bech32)
    pub address: String,
    /// Validator operator address (bech32 valoper)
    pub validator: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Tendermint RPC, e.g. "http://localhost:26657"
    pub tmrpc_endpoint: String,
    /// gRPC, e.g. "http://localhost:9090"
    pub grpc_endpoint: String,
    pub rpc_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// External signer URL; unset means dry run
    pub endpoint: Option<String>,
    pub gas_adjustment: f64,
    pub gas_price: String,
    pub fee_grant_address: Option<String>,
}

/// Host override for one provider
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub rest: String,
    pub websocket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when RUST_LOG is unset
    pub level: String,
    /// "text" or "json"
    pub format: String,
}
