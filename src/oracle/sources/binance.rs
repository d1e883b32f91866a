//! Binance adapter
//!
//! Subscribes the 24hr ticker and 1m kline streams on the raw `/ws`
//! endpoint. Binance pings with protocol frames, so keepalive uses frames
//! as well.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

use crate::oracle::sources::websocket::{FrameUpdate, KeepAlive, WebsocketAdapter};
use crate::oracle::sources::{get_json, Endpoint, ProviderName};
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

const BINANCE_WS_HOST: &str = "stream.binance.com:9443";
const BINANCE_WS_PATH: &str = "/ws";
const BINANCE_REST_HOST: &str = "https://api1.binance.com";
const BINANCE_REST_PATH: &str = "/api/v3/ticker/price";

#[derive(Debug, Clone, Serialize)]
struct SubscribeMsg {
    method: &'static str,
    params: Vec<String>,
    id: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct BinanceTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "v")]
    volume: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BinanceKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: BinanceKline,
}

#[derive(Debug, Clone, Deserialize)]
struct BinanceKline {
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    /// Close time, unix millis
    #[serde(rename = "T")]
    close_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct BinancePairSummary {
    symbol: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceAdapter;

#[async_trait]
impl WebsocketAdapter for BinanceAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Binance
    }

    fn default_endpoint(&self) -> Endpoint {
        Endpoint::new(ProviderName::Binance, BINANCE_REST_HOST, BINANCE_WS_HOST)
    }

    fn websocket_url(&self, endpoint: &Endpoint) -> Result<Url> {
        Url::parse(&format!("wss://{}{}", endpoint.websocket, BINANCE_WS_PATH))
            .context("Invalid Binance websocket endpoint")
    }

    fn exchange_symbol(&self, pair: &CurrencyPair) -> String {
        pair.joined("")
    }

    fn subscription_msgs(&self, pairs: &[CurrencyPair]) -> Result<Vec<serde_json::Value>> {
        let params = pairs
            .iter()
            .flat_map(|p| {
                let stream = p.joined("").to_lowercase();
                [format!("{}@ticker", stream), format!("{}@kline_1m", stream)]
            })
            .collect();

        let msg = SubscribeMsg {
            method: "SUBSCRIBE",
            params,
            id: 1,
        };
        Ok(vec![serde_json::to_value(msg)?])
    }

    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::Frame
    }

    fn decode(&self, text: &str) -> Result<Vec<FrameUpdate>> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        match value["e"].as_str() {
            Some("24hrTicker") => {
                let ticker: BinanceTicker = serde_json::from_value(value)?;
                Ok(vec![FrameUpdate::Ticker {
                    symbol: ticker.symbol,
                    ticker: TickerPrice::new(
                        ticker.last_price.parse().context("Invalid ticker price")?,
                        ticker.volume.parse().context("Invalid ticker volume")?,
                    ),
                }])
            }
            Some("kline") => {
                let event: BinanceKlineEvent = serde_json::from_value(value)?;
                Ok(vec![FrameUpdate::Candle {
                    symbol: event.symbol,
                    candle: CandlePrice::new(
                        event.kline.close.parse().context("Invalid candle close")?,
                        event.kline.volume.parse().context("Invalid candle volume")?,
                        event.kline.close_time,
                    ),
                }])
            }
            // subscription acks: {"result":null,"id":1}
            _ => Ok(Vec::new()),
        }
    }

    async fn available_pairs(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
    ) -> Result<HashSet<String>> {
        let url = format!("{}{}", endpoint.rest, BINANCE_REST_PATH);
        let summary: Vec<BinancePairSummary> = get_json(client, &url).await?;
        Ok(summary.into_iter().map(|p| p.symbol.to_uppercase()).collect())
    }
}
