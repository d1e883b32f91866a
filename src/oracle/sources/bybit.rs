//! Bybit adapter
//!
//! Uses the V5 public spot stream: `tickers.{SYMBOL}` for last price and
//! 24h volume, `kline.1.{SYMBOL}` for one minute candles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

use crate::oracle::sources::websocket::{FrameUpdate, KeepAlive, WebsocketAdapter};
use crate::oracle::sources::{get_json, Endpoint, ProviderName};
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

const BYBIT_WS_HOST: &str = "stream.bybit.com";
const BYBIT_WS_PATH: &str = "/v5/public/spot";
const BYBIT_REST_HOST: &str = "https://api.bybit.com";
const BYBIT_REST_PATH: &str = "/v5/market/tickers?category=spot";

#[derive(Debug, Clone, Serialize)]
struct SubscribeMsg {
    op: &'static str,
    args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BybitMessage {
    topic: Option<String>,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitTicker {
    symbol: String,
    last_price: String,
    #[serde(rename = "volume24h")]
    volume_24h: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BybitKline {
    /// Candle end, unix millis
    end: i64,
    close: String,
    volume: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BybitTickersResponse {
    result: BybitTickersResult,
}

#[derive(Debug, Clone, Deserialize)]
struct BybitTickersResult {
    list: Vec<BybitPairSummary>,
}

#[derive(Debug, Clone, Deserialize)]
struct BybitPairSummary {
    symbol: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BybitAdapter;

#[async_trait]
impl WebsocketAdapter for BybitAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Bybit
    }

    fn default_endpoint(&self) -> Endpoint {
        Endpoint::new(ProviderName::Bybit, BYBIT_REST_HOST, BYBIT_WS_HOST)
    }

    fn websocket_url(&self, endpoint: &Endpoint) -> Result<Url> {
        Url::parse(&format!("wss://{}{}", endpoint.websocket, BYBIT_WS_PATH))
            .context("Invalid Bybit websocket endpoint")
    }

    fn exchange_symbol(&self, pair: &CurrencyPair) -> String {
        pair.joined("")
    }

    fn subscription_msgs(&self, pairs: &[CurrencyPair]) -> Result<Vec<serde_json::Value>> {
        let args = pairs
            .iter()
            .flat_map(|p| {
                let symbol = self.exchange_symbol(p);
                [format!("tickers.{}", symbol), format!("kline.1.{}", symbol)]
            })
            .collect();

        let msg = SubscribeMsg {
            op: "subscribe",
            args,
        };
        Ok(vec![serde_json::to_value(msg)?])
    }

    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::Text(r#"{"op":"ping"}"#)
    }

    fn decode(&self, text: &str) -> Result<Vec<FrameUpdate>> {
        let msg: BybitMessage = serde_json::from_str(text)?;

        // pong and subscription responses carry no topic
        let (topic, data) = match (msg.topic, msg.data) {
            (Some(topic), Some(data)) => (topic, data),
            _ => return Ok(Vec::new()),
        };

        if topic.starts_with("tickers.") {
            let ticker: BybitTicker = serde_json::from_value(data)?;
            return Ok(vec![FrameUpdate::Ticker {
                symbol: ticker.symbol,
                ticker: TickerPrice::new(
                    ticker.last_price.parse().context("Invalid ticker price")?,
                    ticker.volume_24h.parse().context("Invalid ticker volume")?,
                ),
            }]);
        }

        if let Some(symbol) = topic.strip_prefix("kline.1.") {
            let klines: Vec<BybitKline> = serde_json::from_value(data)?;
            return klines
                .into_iter()
                .map(|k| -> Result<FrameUpdate> {
                    Ok(FrameUpdate::Candle {
                        symbol: symbol.to_string(),
                        candle: CandlePrice::new(
                            k.close.parse().context("Invalid candle close")?,
                            k.volume.parse().context("Invalid candle volume")?,
                            k.end,
                        ),
                    })
                })
                .collect();
        }

        Ok(Vec::new())
    }

    async fn available_pairs(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
    ) -> Result<HashSet<String>> {
        let url = format!("{}{}", endpoint.rest, BYBIT_REST_PATH);
        let response: BybitTickersResponse = get_json(client, &url).await?;
        Ok(response
            .result
            .list
            .into_iter()
            .map(|p| p.symbol.to_uppercase())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_ticker_snapshot() {
        let frame = r#"{"topic":"tickers.ATOMUSDT","ts":1673853746003,"type":"snapshot","data":{"symbol":"ATOMUSDT","lastPrice":"29.93","volume24h":"1000.5"}}"#;
        let updates = BybitAdapter.decode(frame).unwrap();
        assert_eq!(
            updates,
            vec![FrameUpdate::Ticker {
                symbol: "ATOMUSDT".to_string(),
                ticker: TickerPrice::new(dec!(29.93), dec!(1000.5)),
            }]
        );
    }

    #[test]
    fn test_decode_kline_batch() {
        let frame = r#"{"topic":"kline.1.ATOMUSDT","type":"snapshot","data":[{"start":1672324800000,"end":1672324859999,"interval":"1","close":"29.9","volume":"3"},{"start":1672324860000,"end":1672324919999,"interval":"1","close":"30.0","volume":"4"}]}"#;
        let updates = BybitAdapter.decode(frame).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[1],
            FrameUpdate::Candle {
                symbol: "ATOMUSDT".to_string(),
                candle: CandlePrice::new(dec!(30.0), dec!(4), 1_672_324_919_999),
            }
        );
    }

    #[test]
    fn test_decode_pong_is_empty() {
        let frame = r#"{"success":true,"ret_msg":"pong","conn_id":"x","op":"ping"}"#;
        assert!(BybitAdapter.decode(frame).unwrap().is_empty());
    }
}
