//! Mexc adapter
//!
//! One `sub.kline` message per pair plus a single `sub.overview`, which
//! streams tickers for every market at once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use url::Url;

use crate::oracle::sources::websocket::{FrameUpdate, WebsocketAdapter};
use crate::oracle::sources::{get_json, Endpoint, ProviderName};
use crate::types::{decimal_from_json, seconds_to_milli, CandlePrice, CurrencyPair, TickerPrice};

const MEXC_WS_HOST: &str = "wbs.mexc.com";
const MEXC_WS_PATH: &str = "/raw/ws";
const MEXC_REST_HOST: &str = "https://www.mexc.com";
const MEXC_REST_PATH: &str = "/open/api/v2/market/ticker";

#[derive(Debug, Clone, Serialize)]
struct CandleSubscription {
    op: &'static str,
    symbol: String,
    interval: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct TickerSubscription {
    op: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct MexcCandleResponse {
    symbol: String,
    data: MexcCandle,
}

#[derive(Debug, Clone, Deserialize)]
struct MexcCandle {
    #[serde(rename = "c")]
    close: serde_json::Value,
    /// Candle time, unix seconds
    #[serde(rename = "t")]
    timestamp: i64,
    #[serde(rename = "v")]
    volume: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct MexcTickerResponse {
    data: HashMap<String, MexcTicker>,
}

#[derive(Debug, Clone, Deserialize)]
struct MexcTicker {
    #[serde(rename = "p")]
    last_price: serde_json::Value,
    #[serde(rename = "v")]
    volume: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct MexcPairsResponse {
    data: Vec<MexcPairSummary>,
}

#[derive(Debug, Clone, Deserialize)]
struct MexcPairSummary {
    symbol: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MexcAdapter;

#[async_trait]
impl WebsocketAdapter for MexcAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Mexc
    }

    fn default_endpoint(&self) -> Endpoint {
        Endpoint::new(ProviderName::Mexc, MEXC_REST_HOST, MEXC_WS_HOST)
    }

    fn websocket_url(&self, endpoint: &Endpoint) -> Result<Url> {
        Url::parse(&format!("wss://{}{}", endpoint.websocket, MEXC_WS_PATH))
            .context("Invalid Mexc websocket endpoint")
    }

    fn exchange_symbol(&self, pair: &CurrencyPair) -> String {
        pair.joined("_")
    }

    fn subscription_msgs(&self, pairs: &[CurrencyPair]) -> Result<Vec<serde_json::Value>> {
        let mut msgs = Vec::with_capacity(pairs.len() + 1);
        for pair in pairs {
            msgs.push(serde_json::to_value(CandleSubscription {
                op: "sub.kline",
                symbol: self.exchange_symbol(pair),
                interval: "Min1",
            })?);
        }
        msgs.push(serde_json::to_value(TickerSubscription { op: "sub.overview" })?);
        Ok(msgs)
    }

    fn decode(&self, text: &str) -> Result<Vec<FrameUpdate>> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        if value["symbol"].is_string() && value["data"]["c"].is_number() {
            let resp: MexcCandleResponse = serde_json::from_value(value)?;
            let candle = CandlePrice::new(
                decimal_from_json(&resp.data.close).context("Invalid candle close")?,
                decimal_from_json(&resp.data.volume).context("Invalid candle volume")?,
                seconds_to_milli(resp.data.timestamp),
            );
            if candle.price.is_zero() {
                return Ok(Vec::new());
            }
            return Ok(vec![FrameUpdate::Candle {
                symbol: resp.symbol,
                candle,
            }]);
        }

        if value["data"].is_object() {
            let resp: MexcTickerResponse = match serde_json::from_value(value) {
                Ok(resp) => resp,
                // acks such as {"channel":"rs.sub.overview","data":"success"}
                Err(_) => return Ok(Vec::new()),
            };
            let mut updates = Vec::with_capacity(resp.data.len());
            for (symbol, ticker) in resp.data {
                let price = decimal_from_json(&ticker.last_price)
                    .with_context(|| format!("Invalid ticker price for {}", symbol))?;
                if price.is_zero() {
                    continue;
                }
                let volume = decimal_from_json(&ticker.volume)
                    .with_context(|| format!("Invalid ticker volume for {}", symbol))?;
                updates.push(FrameUpdate::Ticker {
                    symbol,
                    ticker: TickerPrice::new(price, volume),
                });
            }
            return Ok(updates);
        }

        Ok(Vec::new())
    }

    async fn available_pairs(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
    ) -> Result<HashSet<String>> {
        let url = format!("{}{}", endpoint.rest, MEXC_REST_PATH);
        let response: MexcPairsResponse = get_json(client, &url).await?;
        Ok(response
            .data
            .into_iter()
            .map(|p| p.symbol.replace('_', "").to_uppercase())
            .collect())
    }
}
