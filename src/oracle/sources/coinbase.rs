//! Coinbase Exchange adapter
//!
//! The public feed has no kline channel. `ticker` frames give last price and
//! 24h volume; every `match` (trade) frame is recorded as one candle sample.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

use crate::oracle::sources::websocket::{FrameUpdate, KeepAlive, WebsocketAdapter};
use crate::oracle::sources::{get_json, Endpoint, ProviderName};
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

const COINBASE_WS_HOST: &str = "ws-feed.exchange.coinbase.com";
const COINBASE_REST_HOST: &str = "https://api.exchange.coinbase.com";
const COINBASE_REST_PATH: &str = "/products";

#[derive(Debug, Clone, Serialize)]
struct SubscribeMsg {
    #[serde(rename = "type")]
    msg_type: &'static str,
    product_ids: Vec<String>,
    channels: Vec<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
struct CoinbaseTicker {
    product_id: String,
    price: String,
    volume_24h: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CoinbaseMatch {
    product_id: String,
    price: String,
    size: String,
    time: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CoinbaseProduct {
    base_currency: String,
    quote_currency: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoinbaseAdapter;

#[async_trait]
impl WebsocketAdapter for CoinbaseAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Coinbase
    }

    fn default_endpoint(&self) -> Endpoint {
        Endpoint::new(ProviderName::Coinbase, COINBASE_REST_HOST, COINBASE_WS_HOST)
    }

    fn websocket_url(&self, endpoint: &Endpoint) -> Result<Url> {
        Url::parse(&format!("wss://{}", endpoint.websocket))
            .context("Invalid Coinbase websocket endpoint")
    }

    fn exchange_symbol(&self, pair: &CurrencyPair) -> String {
        pair.joined("-")
    }

    fn subscription_msgs(&self, pairs: &[CurrencyPair]) -> Result<Vec<serde_json::Value>> {
        let msg = SubscribeMsg {
            msg_type: "subscribe",
            product_ids: pairs.iter().map(|p| self.exchange_symbol(p)).collect(),
            channels: vec!["ticker", "matches"],
        };
        Ok(vec![serde_json::to_value(msg)?])
    }

    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::Frame
    }

    fn decode(&self, text: &str) -> Result<Vec<FrameUpdate>> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        match value["type"].as_str() {
            Some("ticker") => {
                let ticker: CoinbaseTicker = serde_json::from_value(value)?;
                Ok(vec![FrameUpdate::Ticker {
                    symbol: ticker.product_id,
                    ticker: TickerPrice::new(
                        ticker.price.parse().context("Invalid ticker price")?,
                        ticker.volume_24h.parse().context("Invalid ticker volume")?,
                    ),
                }])
            }
            Some("match") | Some("last_match") => {
                let trade: CoinbaseMatch = serde_json::from_value(value)?;
                let timestamp = DateTime::parse_from_rfc3339(&trade.time)
                    .with_context(|| format!("Invalid trade time {}", trade.time))?
                    .timestamp_millis();
                Ok(vec![FrameUpdate::Candle {
                    symbol: trade.product_id,
                    candle: CandlePrice::new(
                        trade.price.parse().context("Invalid trade price")?,
                        trade.size.parse().context("Invalid trade size")?,
                        timestamp,
                    ),
                }])
            }
            Some("error") => {
                tracing::warn!(provider = %self.name(), message = %value["message"], "Feed error");
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn available_pairs(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
    ) -> Result<HashSet<String>> {
        let url = format!("{}{}", endpoint.rest, COINBASE_REST_PATH);
        let products: Vec<CoinbaseProduct> = get_json(client, &url).await?;
        Ok(products
            .into_iter()
            .map(|p| CurrencyPair::new(p.base_currency, p.quote_currency).joined(""))
            .collect())
    }
}
