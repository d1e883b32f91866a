//! Price providers (Binance, Bybit, Coinbase, Mexc, Osmosis)
//!
//! Every exchange implements [`Provider`]. Websocket exchanges share one
//! harness ([`WebsocketProvider`]) and only contribute an adapter that knows
//! their subscription messages and frame layout; poll exchanges refresh a
//! snapshot from REST in the background.

mod binance;
mod bybit;
mod coinbase;
mod mexc;
mod osmosis;
mod store;
mod websocket;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use coinbase::CoinbaseAdapter;
pub use mexc::MexcAdapter;
pub use osmosis::OsmosisProvider;
pub use store::PriceStore;
pub use websocket::{
    FrameUpdate, KeepAlive, MessageHandler, SubscriptionHandle, WebsocketAdapter,
    WebsocketController, WebsocketProvider,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::FeederError;
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

/// HTTP request timeout for provider REST calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Forced reconnect interval; exchange gateways drop links after 24h
pub const DEFAULT_MAX_CONNECTION_TIME: Duration = Duration::from_secs(23 * 60 * 60);
/// Delay between failed connection attempts
pub const DEFAULT_RECONNECT_TIME: Duration = Duration::from_secs(2 * 60);
/// Keepalive cadence
pub const DEFAULT_PING_DURATION: Duration = Duration::from_secs(15);
/// Candles older than this are pruned on insert
pub const PROVIDER_CANDLE_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Provider -> base -> latest ticker, rebuilt every tick
pub type AggregatedProviderPrices = HashMap<ProviderName, HashMap<String, TickerPrice>>;

/// Provider -> base -> candle window, rebuilt every tick
pub type AggregatedProviderCandles = HashMap<ProviderName, HashMap<String, Vec<CandlePrice>>>;

/// Supported exchange providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Binance,
    Bybit,
    Coinbase,
    Mexc,
    Osmosis,
}

impl ProviderName {
    pub const ALL: [ProviderName; 5] = [
        ProviderName::Binance,
        ProviderName::Bybit,
        ProviderName::Coinbase,
        ProviderName::Mexc,
        ProviderName::Osmosis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Binance => "binance",
            ProviderName::Bybit => "bybit",
            ProviderName::Coinbase => "coinbase",
            ProviderName::Mexc => "mexc",
            ProviderName::Osmosis => "osmosis",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderName::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| FeederError::ProviderNotFound(s.to_string()).into())
    }
}

/// Override for a provider's hardcoded REST and websocket hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: ProviderName,
    /// REST base URL, e.g. "https://api1.binance.com"
    pub rest: String,
    /// Websocket host, e.g. "stream.binance.com:9443"
    pub websocket: String,
}

impl Endpoint {
    pub fn new(name: ProviderName, rest: impl Into<String>, websocket: impl Into<String>) -> Self {
        Self {
            name,
            rest: rest.into(),
            websocket: websocket.into(),
        }
    }

    /// Picks the override when it targets `defaults.name`, else the defaults.
    pub fn resolve(overridden: Option<&Endpoint>, defaults: Endpoint) -> Endpoint {
        match overridden {
            Some(e) if e.name == defaults.name => e.clone(),
            _ => defaults,
        }
    }
}

/// Capability contract every exchange implements
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Latest ticker per requested pair, keyed by the pair symbol ("ATOMUSDT").
    async fn get_ticker_prices(&self, pairs: &[CurrencyPair])
        -> Result<HashMap<String, TickerPrice>>;

    /// Candle window per requested pair, keyed by the pair symbol.
    async fn get_candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>>;

    /// Subscribes ticker and candle channels for additional pairs.
    async fn subscribe_currency_pairs(&self, pairs: &[CurrencyPair]) -> Result<()>;

    /// Every pair symbol the exchange can serve.
    async fn get_available_pairs(&self) -> Result<HashSet<String>>;
}

/// Builds a provider for `name`, starting its background tasks.
pub async fn new_provider(
    name: ProviderName,
    endpoint: Option<&Endpoint>,
    pairs: &[CurrencyPair],
    cancel: CancellationToken,
) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match name {
        ProviderName::Binance => Arc::new(WebsocketProvider::new(
            BinanceAdapter,
            endpoint,
            pairs,
            cancel,
        )?),
        ProviderName::Bybit => Arc::new(WebsocketProvider::new(
            BybitAdapter,
            endpoint,
            pairs,
            cancel,
        )?),
        ProviderName::Coinbase => Arc::new(WebsocketProvider::new(
            CoinbaseAdapter,
            endpoint,
            pairs,
            cancel,
        )?),
        ProviderName::Mexc => Arc::new(WebsocketProvider::new(
            MexcAdapter,
            endpoint,
            pairs,
            cancel,
        )?),
        ProviderName::Osmosis => Arc::new(OsmosisProvider::start(endpoint, pairs, cancel).await?),
    };

    Ok(provider)
}

/// REST client shared by providers: bounded timeout, redirects refused.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("Failed to create HTTP client")
}

/// GETs `url` and decodes the JSON body, rejecting non-200 responses.
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to request {}", url))?;

    if response.status() != reqwest::StatusCode::OK {
        bail!("unexpected status: {}", response.status());
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to decode response from {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_name_round_trips_config_strings() {
        for name in ProviderName::ALL {
            assert_eq!(name.as_str().parse::<ProviderName>().unwrap(), name);
        }
        assert_eq!("Binance".parse::<ProviderName>().unwrap(), ProviderName::Binance);
        assert!("kraken".parse::<ProviderName>().is_err());
    }

    #[test]
    fn test_endpoint_override_only_applies_to_matching_provider() {
        let defaults = Endpoint::new(ProviderName::Mexc, "https://www.mexc.com", "wbs.mexc.com");
        let other = Endpoint::new(ProviderName::Binance, "http://localhost", "localhost:1");
        let own = Endpoint::new(ProviderName::Mexc, "http://localhost:8080", "localhost:8081");

        assert_eq!(Endpoint::resolve(None, defaults.clone()), defaults);
        assert_eq!(Endpoint::resolve(Some(&other), defaults.clone()), defaults);
        assert_eq!(Endpoint::resolve(Some(&own), defaults), own);
    }
}
