//! Commit/reveal helpers
//!
//! The chain recomputes the prevote hash from the revealed salt and rates,
//! so the rates string format below is consensus critical.

use anyhow::{Context, Result};
use rand::RngCore;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::error::FeederError;

/// Fractional digits of every rate in the vote
pub const RATE_PRECISION: u32 = 18;

/// Bytes of sha256 kept in an aggregate vote hash
const VOTE_HASH_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRateTuple {
    pub denom: String,
    pub exchange_rate: Decimal,
}

/// Hex encoding of `length` random bytes.
pub fn generate_salt(length: usize) -> Result<String> {
    if length == 0 {
        return Err(FeederError::InvalidSaltLength.into());
    }

    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    Ok(hex::encode(bytes))
}

/// Formats a rate with exactly [`RATE_PRECISION`] fractional digits.
pub fn format_rate(price: Decimal) -> String {
    let mut rate =
        price.round_dp_with_strategy(RATE_PRECISION, RoundingStrategy::MidpointNearestEven);
    rate.rescale(RATE_PRECISION);
    rate.to_string()
}

/// `BASE:price` entries sorted lexically and joined by `,`.
pub fn generate_exchange_rates_string(prices: &HashMap<String, Decimal>) -> String {
    let mut rates: Vec<String> = prices
        .iter()
        .map(|(base, price)| format!("{}:{}", base, format_rate(*price)))
        .collect();
    rates.sort();
    rates.join(",")
}

/// Hex of the first 20 bytes of `sha256("{salt}:{rates}:{validator}")`.
pub fn aggregate_vote_hash(salt: &str, exchange_rates: &str, validator: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", salt, exchange_rates, validator).as_bytes());
    hex::encode(&digest[..VOTE_HASH_LEN])
}

/// Parses `DENOM:rate,DENOM:rate`. Denoms are upper-cased and must be
/// unique; rates must be positive.
pub fn parse_exchange_rate_tuples(tuples: &str) -> Result<Vec<ExchangeRateTuple>> {
    if tuples.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = HashSet::new();
    let mut parsed = Vec::new();

    for entry in tuples.split(',') {
        let parts: Vec<&str> = entry.split(':').collect();
        let [denom, rate] = parts.as_slice() else {
            return Err(FeederError::InvalidExchangeRate(entry.to_string()).into());
        };

        let exchange_rate = Decimal::from_str(rate)
            .with_context(|| format!("invalid exchange rate {}", entry))?;
        if exchange_rate <= Decimal::ZERO {
            return Err(FeederError::InvalidExchangeRate(entry.to_string()).into());
        }

        let denom = denom.to_uppercase();
        if !seen.insert(denom.clone()) {
            return Err(FeederError::DuplicateDenom(denom).into());
        }

        parsed.push(ExchangeRateTuple {
            denom,
            exchange_rate,
        });
    }

    Ok(parsed)
}
