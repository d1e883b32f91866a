//! Core types used throughout the price feeder
//!
//! Currency pairs, ticker/candle samples and the unix-millisecond time
//! helpers every provider uses to stamp and prune candles.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Denom every computed price is expressed in
pub const DENOM_USD: &str = "USD";

/// Quotes a configured pair may use
pub const SUPPORTED_QUOTES: [&str; 6] = [DENOM_USD, "USDC", "USDT", "DAI", "BTC", "ETH"];

/// A base/quote asset pair, e.g. ATOM/USDT
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Canonical lookup key ("ATOMUSDT")
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// Whether the pair is already USD denominated
    pub fn is_usd_quoted(&self) -> bool {
        self.quote.eq_ignore_ascii_case(DENOM_USD)
    }

    /// Symbol joined with an exchange specific separator ("ATOM_USDT")
    pub fn joined(&self, separator: &str) -> String {
        format!("{}{}{}", self.base, separator, self.quote).to_uppercase()
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

/// Latest trade price and 24h volume reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerPrice {
    pub price: Decimal,
    pub volume: Decimal,
}

impl TickerPrice {
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self { price, volume }
    }
}

/// One candle sample: close price, volume over the candle, unix millis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandlePrice {
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
}

impl CandlePrice {
    pub fn new(price: Decimal, volume: Decimal, timestamp: i64) -> Self {
        Self {
            price,
            volume,
            timestamp,
        }
    }
}

/// Millisecond timestamp for `now - ago`, truncated to whole seconds.
pub fn past_unix_time(ago: Duration) -> i64 {
    let secs = Utc::now().timestamp() - ago.as_secs() as i64;
    seconds_to_milli(secs)
}

/// Converts unix seconds to unix milliseconds.
pub fn seconds_to_milli(secs: i64) -> i64 {
    secs * 1000
}

/// Parses an exchange decimal that may arrive as a JSON string or number.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => {
            let repr = n.to_string();
            repr.parse()
                .ok()
                .or_else(|| Decimal::from_scientific(&repr).ok())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_pair_symbol() {
        let cp = CurrencyPair::new("ATOM", "USDT");
        assert_eq!(cp.symbol(), "ATOMUSDT");
        assert_eq!(cp.to_string(), "ATOMUSDT");
        assert_eq!(cp.joined("_"), "ATOM_USDT");
        assert!(!cp.is_usd_quoted());
        assert!(CurrencyPair::new("USDT", "USD").is_usd_quoted());
    }

    #[test]
    fn test_past_unix_time_is_whole_seconds() {
        let ts = past_unix_time(Duration::from_secs(600));
        assert_eq!(ts % 1000, 0);
        assert!(ts < Utc::now().timestamp_millis());
        assert_eq!(seconds_to_milli(1_645_756_200), 1_645_756_200_000);
    }

    #[test]
    fn test_decimal_from_json() {
        assert_eq!(
            decimal_from_json(&serde_json::json!("29.93")),
            Some(dec!(29.93))
        );
        assert_eq!(decimal_from_json(&serde_json::json!(12)), Some(dec!(12)));
        assert_eq!(decimal_from_json(&serde_json::json!(0.5)), Some(dec!(0.5)));
        assert_eq!(decimal_from_json(&serde_json::json!(null)), None);
    }
}
