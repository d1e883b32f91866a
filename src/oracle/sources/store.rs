//! Per-provider price cache
//!
//! Written by exactly one owner (the provider's websocket handler or poll
//! loop) and read by the tick loop. Reads copy data out; the live maps are
//! never handed to callers.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::oracle::candles::insert_candle;
use crate::types::{CandlePrice, TickerPrice};

#[derive(Debug, Default, Clone)]
struct Snapshot {
    tickers: HashMap<String, TickerPrice>,
    candles: HashMap<String, Vec<CandlePrice>>,
}

/// Exchange symbol -> latest ticker / candle window
#[derive(Debug, Default)]
pub struct PriceStore {
    inner: RwLock<Snapshot>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_ticker(&self, symbol: &str, ticker: TickerPrice) {
        self.write().tickers.insert(symbol.to_string(), ticker);
    }

    /// Inserts a candle, pruning the symbol's window at `stale_before` (ms).
    pub fn add_candle(&self, symbol: &str, candle: CandlePrice, stale_before: i64) {
        let mut snapshot = self.write();
        let window = snapshot.candles.entry(symbol.to_string()).or_default();
        insert_candle(window, candle, stale_before);
    }

    /// Swaps in a complete snapshot in one step (poll providers).
    pub fn replace(
        &self,
        tickers: HashMap<String, TickerPrice>,
        candles: HashMap<String, Vec<CandlePrice>>,
    ) {
        *self.write() = Snapshot { tickers, candles };
    }

    pub fn ticker(&self, symbol: &str) -> Option<TickerPrice> {
        self.read().tickers.get(symbol).copied()
    }

    pub fn candles(&self, symbol: &str) -> Option<Vec<CandlePrice>> {
        self.read().candles.get(symbol).cloned()
    }

    #[cfg(test)]
    fn ticker_count(&self) -> usize {
        self.read().tickers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reads_are_copies() {
        let store = PriceStore::new();
        store.add_candle("ATOMUSDT", CandlePrice::new(dec!(10), dec!(1), 2_000), 0);

        let mut copy = store.candles("ATOMUSDT").unwrap();
        copy.clear();

        assert_eq!(store.candles("ATOMUSDT").unwrap().len(), 1);
    }

    #[test]
    fn test_replace_swaps_whole_snapshot() {
        let store = PriceStore::new();
        store.set_ticker("OSMO", TickerPrice::new(dec!(1), dec!(1)));

        let mut tickers = HashMap::new();
        tickers.insert("JUNO".to_string(), TickerPrice::new(dec!(3.7), dec!(10)));
        store.replace(tickers, HashMap::new());

        assert!(store.ticker("OSMO").is_none());
        assert_eq!(store.ticker("JUNO").unwrap().price, dec!(3.7));
        assert_eq!(store.ticker_count(), 1);
    }
}
