//! Cross-provider deviation filter
//!
//! A provider's price for a base survives when it lies within
//! `mean ± deviation * threshold`. The threshold defaults to 1 and can be
//! overridden per base. Bases with too few samples for statistics pass
//! untouched.

use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::oracle::aggregator::{standard_deviation, PricesByProvider};
use crate::oracle::sources::{AggregatedProviderCandles, AggregatedProviderPrices, ProviderName};
use crate::telemetry;
use crate::types::CandlePrice;

fn is_between(price: Decimal, mean: Decimal, margin: Decimal) -> bool {
    price >= mean - margin && price <= mean + margin
}

struct DeviationCheck {
    deviations: HashMap<String, Decimal>,
    means: HashMap<String, Decimal>,
}

impl DeviationCheck {
    fn new(prices: &PricesByProvider) -> Result<Self> {
        let (deviations, means) = standard_deviation(prices)?;
        Ok(Self { deviations, means })
    }

    fn passes(
        &self,
        provider: ProviderName,
        base: &str,
        price: Decimal,
        thresholds: &HashMap<String, Decimal>,
    ) -> bool {
        let (Some(deviation), Some(mean)) = (self.deviations.get(base), self.means.get(base)) else {
            return true;
        };

        let threshold = thresholds.get(base).copied().unwrap_or(Decimal::ONE);
        if is_between(price, *mean, *deviation * threshold) {
            return true;
        }

        telemetry::price_filtered(base);
        tracing::warn!(
            provider = %provider,
            base = %base,
            price = %price,
            mean = %mean,
            margin = %(*deviation * threshold),
            "Provider deviating from other prices"
        );
        false
    }
}

/// Drops ticker prices that deviate from the cross-provider mean.
/// Providers left with no prices are removed from the result.
pub fn filter_ticker_deviations(
    prices: &AggregatedProviderPrices,
    thresholds: &HashMap<String, Decimal>,
) -> Result<AggregatedProviderPrices> {
    let price_map: PricesByProvider = prices
        .iter()
        .map(|(provider, tickers)| {
            let flat = tickers
                .iter()
                .map(|(base, tp)| (base.clone(), tp.price))
                .collect();
            (*provider, flat)
        })
        .collect();

    let check = DeviationCheck::new(&price_map)?;

    let mut filtered: AggregatedProviderPrices = HashMap::new();
    for (provider, tickers) in prices {
        for (base, tp) in tickers {
            if check.passes(*provider, base, tp.price, thresholds) {
                filtered.entry(*provider).or_default().insert(base.clone(), *tp);
            }
        }
    }

    Ok(filtered)
}

fn latest_candle(candles: &[CandlePrice]) -> Option<&CandlePrice> {
    candles.iter().max_by_key(|c| c.timestamp)
}

/// Drops candle windows whose most recent candle deviates from the
/// cross-provider mean of most recent candles. A passing window is kept whole.
pub fn filter_candle_deviations(
    candles: &AggregatedProviderCandles,
    thresholds: &HashMap<String, Decimal>,
) -> Result<AggregatedProviderCandles> {
    let price_map: PricesByProvider = candles
        .iter()
        .map(|(provider, windows)| {
            let flat = windows
                .iter()
                .filter_map(|(base, window)| latest_candle(window).map(|c| (base.clone(), c.price)))
                .collect();
            (*provider, flat)
        })
        .collect();

    let check = DeviationCheck::new(&price_map)?;

    let mut filtered: AggregatedProviderCandles = HashMap::new();
    for (provider, windows) in candles {
        for (base, window) in windows {
            let Some(latest) = latest_candle(window) else {
                continue;
            };
            if check.passes(*provider, base, latest.price, thresholds) {
                filtered
                    .entry(*provider)
                    .or_default()
                    .insert(base.clone(), window.clone());
            }
        }
    }

    Ok(filtered)
}
