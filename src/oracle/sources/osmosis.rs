//! Osmosis poll provider
//!
//! Osmosis has no websocket feed. A background task refreshes tickers and
//! candles from the Imperator REST API and swaps the snapshot in one step;
//! reads never touch the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::FeederError;
use crate::oracle::candles::{prune_stale, provider_stale_cutoff};
use crate::oracle::sources::{get_json, http_client, Endpoint, PriceStore, Provider, ProviderName};
use crate::types::{decimal_from_json, seconds_to_milli, CandlePrice, CurrencyPair, TickerPrice};

const OSMOSIS_REST_HOST: &str = "https://api-osmosis.imperator.co";
const OSMOSIS_TOKEN_ENDPOINT: &str = "/tokens/v2";
const OSMOSIS_CANDLE_ENDPOINT: &str = "/tokens/v2/historical";
const OSMOSIS_PAIRS_ENDPOINT: &str = "/pairs/v1/summary";

/// Snapshot refresh cadence
pub const OSMOSIS_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OsmosisToken {
    price: serde_json::Value,
    symbol: String,
    volume_24h: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OsmosisCandle {
    /// Unix seconds
    time: i64,
    close: serde_json::Value,
    volume: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct OsmosisPairsSummary {
    data: Vec<OsmosisPairData>,
}

#[derive(Debug, Clone, Deserialize)]
struct OsmosisPairData {
    base_symbol: String,
    quote_symbol: String,
}

pub struct OsmosisProvider {
    base_url: String,
    client: reqwest::Client,
    pairs: Vec<CurrencyPair>,
    store: Arc<PriceStore>,
}

impl OsmosisProvider {
    pub fn new(endpoint: Option<&Endpoint>, pairs: &[CurrencyPair]) -> Result<Self> {
        let defaults = Endpoint::new(ProviderName::Osmosis, OSMOSIS_REST_HOST, "");
        let endpoint = Endpoint::resolve(endpoint, defaults);

        Ok(Self {
            base_url: endpoint.rest,
            client: http_client()?,
            pairs: pairs.to_vec(),
            store: Arc::new(PriceStore::new()),
        })
    }

    /// Builds the provider, loads a first snapshot and spawns the poll loop.
    pub async fn start(
        endpoint: Option<&Endpoint>,
        pairs: &[CurrencyPair],
        cancel: CancellationToken,
    ) -> Result<Self> {
        let provider = Self::new(endpoint, pairs)?;
        if let Err(e) = provider.refresh().await {
            tracing::warn!(provider = %ProviderName::Osmosis, error = %e, "Initial snapshot failed");
        }

        let poller = Self {
            base_url: provider.base_url.clone(),
            client: provider.client.clone(),
            pairs: provider.pairs.clone(),
            store: provider.store.clone(),
        };
        tokio::spawn(async move { poller.poll(cancel).await });

        Ok(provider)
    }

    async fn poll(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(OSMOSIS_POLL_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::error!(provider = %ProviderName::Osmosis, error = %e, "Snapshot refresh failed");
                    }
                }
            }
        }
    }

    /// Fetches tickers and candles for every pair and swaps the snapshot.
    /// A failure leaves the previous snapshot in place.
    pub async fn refresh(&self) -> Result<()> {
        let tickers = self.fetch_tickers().await?;

        let mut candles = HashMap::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            candles.insert(pair.symbol(), self.fetch_candles(pair).await?);
        }

        self.store.replace(tickers, candles);
        Ok(())
    }

    async fn fetch_tickers(&self) -> Result<HashMap<String, TickerPrice>> {
        let url = format!("{}{}/all", self.base_url, OSMOSIS_TOKEN_ENDPOINT);
        let tokens: Vec<OsmosisToken> = get_json(&self.client, &url)
            .await
            .context("failed to make Osmosis request")?;
        parse_tickers(tokens, &self.pairs)
    }

    async fn fetch_candles(&self, pair: &CurrencyPair) -> Result<Vec<CandlePrice>> {
        let url = format!(
            "{}{}/{}/chart?tf=5",
            self.base_url, OSMOSIS_CANDLE_ENDPOINT, pair.base
        );
        let candles: Vec<OsmosisCandle> = get_json(&self.client, &url)
            .await
            .context("failed to make Osmosis request")?;
        parse_candles(candles, provider_stale_cutoff())
    }
}

/// Matches tokens to pairs by base symbol. Duplicates and missing pairs fail.
pub(crate) fn parse_tickers(
    tokens: Vec<OsmosisToken>,
    pairs: &[CurrencyPair],
) -> Result<HashMap<String, TickerPrice>> {
    let base_index: HashMap<String, &CurrencyPair> =
        pairs.iter().map(|p| (p.base.to_uppercase(), p)).collect();

    let mut prices = HashMap::with_capacity(pairs.len());
    for token in tokens {
        let symbol = token.symbol.to_uppercase();
        let Some(pair) = base_index.get(&symbol) else {
            continue;
        };

        if prices.contains_key(&pair.symbol()) {
            return Err(FeederError::DuplicateToken {
                provider: ProviderName::Osmosis,
                symbol,
            }
            .into());
        }

        let price = decimal_from_json(&token.price)
            .with_context(|| format!("failed to read Osmosis price ({}) for {}", token.price, symbol))?;
        let volume = decimal_from_json(&token.volume_24h).with_context(|| {
            format!("failed to read Osmosis volume ({}) for {}", token.volume_24h, symbol)
        })?;
        prices.insert(pair.symbol(), TickerPrice::new(price, volume));
    }

    for pair in pairs {
        if !prices.contains_key(&pair.symbol()) {
            return Err(FeederError::MissingExchangeRate(pair.symbol()).into());
        }
    }

    Ok(prices)
}

/// Converts chart points to candles, dropping anything at or before `stale_before` (ms).
pub(crate) fn parse_candles(
    points: Vec<OsmosisCandle>,
    stale_before: i64,
) -> Result<Vec<CandlePrice>> {
    let mut candles = Vec::with_capacity(points.len());
    for point in points {
        candles.push(CandlePrice::new(
            decimal_from_json(&point.close).context("failed to read Osmosis candle close")?,
            decimal_from_json(&point.volume).context("failed to read Osmosis candle volume")?,
            seconds_to_milli(point.time),
        ));
    }
    Ok(prune_stale(candles, stale_before))
}

#[async_trait]
impl Provider for OsmosisProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Osmosis
    }

    async fn get_ticker_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, TickerPrice>> {
        let mut prices = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let ticker = self
                .store
                .ticker(&pair.symbol())
                .ok_or_else(|| FeederError::MissingExchangeRate(pair.symbol()))?;
            prices.insert(pair.symbol(), ticker);
        }
        Ok(prices)
    }

    async fn get_candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>> {
        let mut candles = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let window = self
                .store
                .candles(&pair.symbol())
                .ok_or_else(|| FeederError::CandleNotFound {
                    provider: ProviderName::Osmosis,
                    symbol: pair.symbol(),
                })?;
            candles.insert(pair.symbol(), window);
        }
        Ok(candles)
    }

    async fn subscribe_currency_pairs(&self, _pairs: &[CurrencyPair]) -> Result<()> {
        Ok(())
    }

    async fn get_available_pairs(&self) -> Result<HashSet<String>> {
        let url = format!("{}{}", self.base_url, OSMOSIS_PAIRS_ENDPOINT);
        let summary: OsmosisPairsSummary = get_json(&self.client, &url).await?;
        Ok(summary
            .data
            .into_iter()
            .map(|p| CurrencyPair::new(p.base_symbol, p.quote_symbol).joined(""))
            .collect())
    }
}
