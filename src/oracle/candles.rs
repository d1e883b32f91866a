//! Candle window - bounded per-symbol candle history
//!
//! Providers keep only candles newer than [`PROVIDER_CANDLE_PERIOD`]; the
//! window is pruned on every insert so memory stays bounded and TVWAP never
//! sees samples outside its staleness window.

use crate::oracle::sources::PROVIDER_CANDLE_PERIOD;
use crate::types::{past_unix_time, CandlePrice};

/// Prepends `candle` and drops everything at or before `stale_before` (ms).
pub fn insert_candle(window: &mut Vec<CandlePrice>, candle: CandlePrice, stale_before: i64) {
    let mut fresh = Vec::with_capacity(window.len() + 1);
    fresh.push(candle);
    fresh.extend(window.iter().copied().filter(|c| c.timestamp > stale_before));
    *window = fresh;
}

/// Drops candles at or before `stale_before` (ms), keeping order.
pub fn prune_stale(candles: Vec<CandlePrice>, stale_before: i64) -> Vec<CandlePrice> {
    candles
        .into_iter()
        .filter(|c| c.timestamp > stale_before)
        .collect()
}

/// Cutoff used by providers when inserting a candle now.
pub fn provider_stale_cutoff() -> i64 {
    past_unix_time(PROVIDER_CANDLE_PERIOD)
}
