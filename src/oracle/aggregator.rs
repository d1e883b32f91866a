//! Price reducers
//!
//! Pure functions over the per-tick provider maps. Every map here is keyed
//! by base asset; the quote has already been normalised to USD upstream.

use anyhow::{Context, Result};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::FeederError;
use crate::oracle::sources::{AggregatedProviderCandles, AggregatedProviderPrices, ProviderName};
use crate::types::{past_unix_time, CandlePrice, TickerPrice};

/// Candles older than this contribute nothing to TVWAP
pub const TVWAP_CANDLE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Floor weight given to the oldest candle inside the window
const MINIMUM_TIME_WEIGHT: Decimal = dec!(0.2);

/// Fewer samples than this and a base skips deviation statistics
const MINIMUM_SAMPLE_SIZE: usize = 3;

/// Provider -> base -> price
pub type PricesByProvider = HashMap<ProviderName, HashMap<String, Decimal>>;

fn vwap(
    weighted_prices: HashMap<String, Decimal>,
    volume_sums: &HashMap<String, Decimal>,
) -> HashMap<String, Decimal> {
    weighted_prices
        .into_iter()
        .filter_map(|(base, weighted)| {
            let volume = volume_sums.get(&base).copied().unwrap_or_default();
            if volume.is_zero() {
                None
            } else {
                Some((base, weighted / volume))
            }
        })
        .collect()
}

fn accumulate_tickers(
    tickers: &HashMap<String, TickerPrice>,
    weighted_prices: &mut HashMap<String, Decimal>,
    volume_sums: &mut HashMap<String, Decimal>,
) {
    for (base, tp) in tickers {
        *weighted_prices.entry(base.clone()).or_default() += tp.price * tp.volume;
        *volume_sums.entry(base.clone()).or_default() += tp.volume;
    }
}

/// Volume weighted average price per base across all providers.
/// Bases whose total volume is zero are left out.
pub fn compute_vwap(prices: &AggregatedProviderPrices) -> HashMap<String, Decimal> {
    let mut weighted_prices = HashMap::new();
    let mut volume_sums = HashMap::new();

    for tickers in prices.values() {
        accumulate_tickers(tickers, &mut weighted_prices, &mut volume_sums);
    }

    vwap(weighted_prices, &volume_sums)
}

fn accumulate_candles(
    base: &str,
    candles: &[CandlePrice],
    now: i64,
    cutoff: i64,
    weighted_prices: &mut HashMap<String, Decimal>,
    volume_sums: &mut HashMap<String, Decimal>,
) -> Result<()> {
    if candles.is_empty() {
        return Ok(());
    }

    let mut sorted = candles.to_vec();
    sorted.sort_by_key(|c| c.timestamp);

    let period = Decimal::from(now - sorted[0].timestamp);
    if period.is_zero() {
        return Err(FeederError::TvwapPeriod(base.to_string()).into());
    }
    let weight_unit = (Decimal::ONE - MINIMUM_TIME_WEIGHT) / period;

    let weighted = weighted_prices.entry(base.to_string()).or_default();
    let volume_sum = volume_sums.entry(base.to_string()).or_default();

    for candle in sorted.iter().filter(|c| cutoff < c.timestamp) {
        let time_diff = Decimal::from(now - candle.timestamp);
        let volume = candle.volume * (weight_unit * (period - time_diff) + MINIMUM_TIME_WEIGHT);
        *volume_sum += volume;
        *weighted += candle.price * volume;
    }

    Ok(())
}

/// Time and volume weighted average price per base.
///
/// Within each provider's window the oldest candle gets weight 0.2 and the
/// newest approaches 1.0. Candles older than [`TVWAP_CANDLE_PERIOD`] are
/// ignored, so a base whose every candle is stale is absent from the result.
pub fn compute_tvwap(candles: &AggregatedProviderCandles) -> Result<HashMap<String, Decimal>> {
    let now = past_unix_time(Duration::ZERO);
    let cutoff = past_unix_time(TVWAP_CANDLE_PERIOD);

    let mut weighted_prices = HashMap::new();
    let mut volume_sums = HashMap::new();

    for provider_candles in candles.values() {
        for (base, window) in provider_candles {
            accumulate_candles(base, window, now, cutoff, &mut weighted_prices, &mut volume_sums)?;
        }
    }

    Ok(vwap(weighted_prices, &volume_sums))
}

/// VWAP computed separately for every provider.
pub fn compute_vwaps_by_provider(prices: &AggregatedProviderPrices) -> PricesByProvider {
    prices
        .iter()
        .map(|(provider, tickers)| {
            let mut weighted_prices = HashMap::new();
            let mut volume_sums = HashMap::new();
            accumulate_tickers(tickers, &mut weighted_prices, &mut volume_sums);
            (*provider, vwap(weighted_prices, &volume_sums))
        })
        .collect()
}

/// TVWAP computed separately for every provider.
pub fn compute_tvwaps_by_provider(candles: &AggregatedProviderCandles) -> Result<PricesByProvider> {
    let now = past_unix_time(Duration::ZERO);
    let cutoff = past_unix_time(TVWAP_CANDLE_PERIOD);

    let mut by_provider = HashMap::with_capacity(candles.len());
    for (provider, provider_candles) in candles {
        let mut weighted_prices = HashMap::new();
        let mut volume_sums = HashMap::new();
        for (base, window) in provider_candles {
            accumulate_candles(base, window, now, cutoff, &mut weighted_prices, &mut volume_sums)
                .with_context(|| format!("tvwap failed for {}", provider))?;
        }
        by_provider.insert(*provider, vwap(weighted_prices, &volume_sums));
    }

    Ok(by_provider)
}

/// Population standard deviation and mean of each base's cross-provider
/// prices, returned as `(deviations, means)`. Bases reported by fewer than
/// three providers are skipped.
pub fn standard_deviation(
    prices: &PricesByProvider,
) -> Result<(HashMap<String, Decimal>, HashMap<String, Decimal>)> {
    let mut samples: HashMap<&str, Vec<Decimal>> = HashMap::new();
    for provider_prices in prices.values() {
        for (base, price) in provider_prices {
            samples.entry(base.as_str()).or_default().push(*price);
        }
    }

    let mut deviations = HashMap::new();
    let mut means = HashMap::new();

    for (base, values) in samples {
        if values.len() < MINIMUM_SAMPLE_SIZE {
            continue;
        }

        let count = Decimal::from(values.len());
        let mean = values.iter().sum::<Decimal>() / count;
        let variance = values
            .iter()
            .map(|p| (*p - mean) * (*p - mean))
            .sum::<Decimal>()
            / count;
        let deviation = variance
            .sqrt()
            .with_context(|| format!("standard deviation undefined for {}", base))?;

        deviations.insert(base.to_string(), deviation);
        means.insert(base.to_string(), mean);
    }

    Ok((deviations, means))
}
