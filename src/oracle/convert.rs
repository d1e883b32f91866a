//! USD normalisation
//!
//! Prices quoted in anything other than USD are multiplied by a `<QUOTE>/USD`
//! rate. The rate comes from every provider configured with that USD pair:
//! their prices are deviation-filtered and then reduced the same way as the
//! data being converted (VWAP for tickers, TVWAP for candles). A pair whose
//! quote has no usable rate is dropped for this tick.

use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use crate::error::FeederError;
use crate::oracle::aggregator::{compute_tvwap, compute_vwap};
use crate::oracle::filter::{filter_candle_deviations, filter_ticker_deviations};
use crate::oracle::sources::{AggregatedProviderCandles, AggregatedProviderPrices, ProviderName};
use crate::types::{CurrencyPair, DENOM_USD};

/// Provider -> configured pairs
pub type ProviderPairs = HashMap<ProviderName, Vec<CurrencyPair>>;

/// Providers configured with a `<quote>/USD` pair.
pub fn usd_based_providers(
    quote: &str,
    provider_pairs: &ProviderPairs,
) -> Result<HashSet<ProviderName>> {
    let providers: HashSet<ProviderName> = provider_pairs
        .iter()
        .filter(|(_, pairs)| pairs.iter().any(|p| p.base == quote && p.quote == DENOM_USD))
        .map(|(provider, _)| *provider)
        .collect();

    if providers.is_empty() {
        return Err(FeederError::NoUsdProviders(quote.to_string()).into());
    }
    Ok(providers)
}

/// Memoises one conversion rate per quote for the duration of a call.
struct RateCache<F> {
    rates: HashMap<String, Option<Decimal>>,
    resolve: F,
}

impl<F> RateCache<F>
where
    F: FnMut(&str, &HashSet<ProviderName>) -> Result<Option<Decimal>>,
{
    fn new(resolve: F) -> Self {
        Self {
            rates: HashMap::new(),
            resolve,
        }
    }

    fn rate(&mut self, quote: &str, provider_pairs: &ProviderPairs) -> Result<Option<Decimal>> {
        if let Some(rate) = self.rates.get(quote) {
            return Ok(*rate);
        }

        let rate = match usd_based_providers(quote, provider_pairs) {
            Ok(providers) => {
                let rate = (self.resolve)(quote, &providers)?;
                if rate.is_none() {
                    let e = FeederError::NoConversionRates(quote.to_string());
                    tracing::warn!(quote = %quote, error = %e, "Dropping pairs without USD conversion");
                }
                rate
            }
            Err(e) => {
                tracing::warn!(quote = %quote, error = %e, "Dropping pairs without USD conversion");
                None
            }
        };

        self.rates.insert(quote.to_string(), rate);
        Ok(rate)
    }
}

/// Converts every non-USD ticker to USD.
pub fn convert_tickers_to_usd(
    prices: &AggregatedProviderPrices,
    provider_pairs: &ProviderPairs,
    thresholds: &HashMap<String, Decimal>,
) -> Result<AggregatedProviderPrices> {
    let mut cache = RateCache::new(
        |quote: &str, providers: &HashSet<ProviderName>| -> Result<Option<Decimal>> {
            let usd_rates: AggregatedProviderPrices = providers
                .iter()
                .filter_map(|provider| {
                    let ticker = prices.get(provider)?.get(quote)?;
                    Some((*provider, HashMap::from([(quote.to_string(), *ticker)])))
                })
                .collect();

            let filtered = filter_ticker_deviations(&usd_rates, thresholds)?;
            Ok(compute_vwap(&filtered).get(quote).copied())
        },
    );

    let mut converted: AggregatedProviderPrices = HashMap::new();
    for (provider, pairs) in provider_pairs {
        let Some(tickers) = prices.get(provider) else {
            continue;
        };

        for pair in pairs {
            let Some(ticker) = tickers.get(&pair.base) else {
                continue;
            };

            let mut ticker = *ticker;
            if !pair.is_usd_quoted() {
                let Some(rate) = cache.rate(&pair.quote, provider_pairs)? else {
                    continue;
                };
                ticker.price *= rate;
            }

            converted
                .entry(*provider)
                .or_default()
                .insert(pair.base.clone(), ticker);
        }
    }

    Ok(converted)
}

/// Converts every non-USD candle to USD.
pub fn convert_candles_to_usd(
    candles: &AggregatedProviderCandles,
    provider_pairs: &ProviderPairs,
    thresholds: &HashMap<String, Decimal>,
) -> Result<AggregatedProviderCandles> {
    let mut cache = RateCache::new(
        |quote: &str, providers: &HashSet<ProviderName>| -> Result<Option<Decimal>> {
            let usd_rates: AggregatedProviderCandles = providers
                .iter()
                .filter_map(|provider| {
                    let window = candles.get(provider)?.get(quote)?;
                    Some((*provider, HashMap::from([(quote.to_string(), window.clone())])))
                })
                .collect();

            let filtered = filter_candle_deviations(&usd_rates, thresholds)?;
            Ok(compute_tvwap(&filtered)?.get(quote).copied())
        },
    );

    let mut converted: AggregatedProviderCandles = HashMap::new();
    for (provider, pairs) in provider_pairs {
        let Some(windows) = candles.get(provider) else {
            continue;
        };

        for pair in pairs {
            let Some(window) = windows.get(&pair.base) else {
                continue;
            };

            let mut window = window.clone();
            if !pair.is_usd_quoted() {
                let Some(rate) = cache.rate(&pair.quote, provider_pairs)? else {
                    continue;
                };
                for candle in window.iter_mut() {
                    candle.price *= rate;
                }
            }

            converted
                .entry(*provider)
                .or_default()
                .insert(pair.base.clone(), window);
        }
    }

    Ok(converted)
}
