//! Configuration management for the price feeder
//!
//! Layered with the `config` crate: compiled defaults, then optional
//! `config/default` and `config/local`, then an explicit file, then
//! `PRICE_FEEDER__*` environment variables. Validation runs at load so a bad
//! file fails at startup rather than on the first tick.

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration;

use crate::oracle::sources::{Endpoint, ProviderName};
use crate::types::{DENOM_USD, SUPPORTED_QUOTES};

/// Largest accepted deviation threshold override
pub const MAX_DEVIATION_THRESHOLD: Decimal = dec!(3.0);

/// Distinct providers every base needs unless overridden
pub const MIN_PROVIDERS_PER_BASE: usize = 2;

fn parse_threshold(threshold: &str) -> Result<Decimal> {
    Decimal::from_str(threshold)
        .with_context(|| format!("deviation thresholds must be numeric: {}", threshold))
}

/// Main feeder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeederConfig {
    pub currency_pairs: Vec<CurrencyPairConfig>,
    #[serde(default)]
    pub deviation_thresholds: Vec<DeviationConfig>,
    pub account: AccountConfig,
    pub rpc: RpcConfig,
    pub broadcast: BroadcastConfig,
    /// Deadline for one provider's ticker and candle fetch
    pub provider_timeout_ms: u64,
    /// Skip the per-base provider minimum
    pub provider_min_override: bool,
    #[serde(default)]
    pub provider_endpoints: Vec<EndpointConfig>,
    pub log: LogConfig,
}

impl FeederConfig {
    /// Load configuration from files and environment. `path` names an
    /// explicit file that must exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // PRICE_FEEDER__RPC__GRPC_ENDPOINT etc.
        let builder = builder.add_source(Environment::with_prefix("PRICE_FEEDER").separator("__"));

        Self::finish(builder)
    }

    /// Parse configuration from an in-memory document on top of the defaults.
    pub fn parse(contents: &str, format: FileFormat) -> Result<Self> {
        let builder = Self::defaults()?.add_source(File::from_str(contents, format));
        Self::finish(builder)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            .set_default("provider_timeout_ms", 100)?
            .set_default("provider_min_override", false)?
            .set_default("rpc.rpc_timeout_ms", 10_000)?
            .set_default("broadcast.gas_adjustment", 1.5)?
            .set_default("broadcast.gas_price", "")?
            .set_default("log.level", "info")?
            .set_default("log.format", "text")?;
        Ok(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;

        let feeder_config: FeederConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        feeder_config.validate()?;
        Ok(feeder_config)
    }

    /// Check everything that can be checked without the network.
    pub fn validate(&self) -> Result<()> {
        if self.currency_pairs.is_empty() {
            bail!("at least one currency pair is required");
        }

        for (field, value) in [
            ("account.chain_id", &self.account.chain_id),
            ("account.address", &self.account.address),
            ("account.validator", &self.account.validator),
            ("rpc.tmrpc_endpoint", &self.rpc.tmrpc_endpoint),
            ("rpc.grpc_endpoint", &self.rpc.grpc_endpoint),
        ] {
            if value.trim().is_empty() {
                bail!("{} is required", field);
            }
        }

        let mut providers_by_base: BTreeMap<String, BTreeSet<ProviderName>> = BTreeMap::new();
        let mut non_usd_quotes = BTreeSet::new();

        for pair in &self.currency_pairs {
            if pair.base.is_empty() || pair.quote.is_empty() {
                bail!("currency pairs require a base and a quote");
            }
            if pair.providers.is_empty() {
                bail!("no providers configured for {}{}", pair.base, pair.quote);
            }

            let quote = pair.quote.to_uppercase();
            if !SUPPORTED_QUOTES.contains(&quote.as_str()) {
                bail!("unsupported quote: {}", pair.quote);
            }
            if quote != DENOM_USD {
                non_usd_quotes.insert(quote);
            }

            let providers = providers_by_base.entry(pair.base.to_uppercase()).or_default();
            for name in &pair.providers {
                providers.insert(name.parse::<ProviderName>()?);
            }
        }

        for quote in &non_usd_quotes {
            let has_feed = self.currency_pairs.iter().any(|pair| {
                pair.base.eq_ignore_ascii_case(quote) && pair.quote.eq_ignore_ascii_case(DENOM_USD)
            });
            if !has_feed {
                bail!("all non-usd quotes require a conversion rate feed");
            }
        }

        for deviation in &self.deviation_thresholds {
            if parse_threshold(&deviation.threshold)? > MAX_DEVIATION_THRESHOLD {
                bail!("deviation thresholds must not exceed 3.0");
            }
        }

        for endpoint in &self.provider_endpoints {
            if endpoint.name.is_empty() || endpoint.rest.is_empty() || endpoint.websocket.is_empty()
            {
                bail!("provider endpoints require a name, rest and websocket");
            }
            endpoint.name.parse::<ProviderName>()?;
        }

        if !self.provider_min_override {
            for (base, providers) in &providers_by_base {
                if providers.len() < MIN_PROVIDERS_PER_BASE {
                    bail!(
                        "must have at least {} providers for {}",
                        MIN_PROVIDERS_PER_BASE,
                        base
                    );
                }
            }
        }

        Ok(())
    }

    /// Base -> deviation threshold override.
    pub fn deviations(&self) -> Result<HashMap<String, Decimal>> {
        self.deviation_thresholds
            .iter()
            .map(|d| Ok((d.base.to_uppercase(), parse_threshold(&d.threshold)?)))
            .collect()
    }

    /// Provider -> host override.
    pub fn endpoints(&self) -> Result<HashMap<ProviderName, Endpoint>> {
        self.provider_endpoints
            .iter()
            .map(|e| {
                let name: ProviderName = e.name.parse()?;
                Ok((name, Endpoint::new(name, e.rest.clone(), e.websocket.clone())))
            })
            .collect()
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.rpc_timeout_ms)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let pairs: Vec<String> = self
            .currency_pairs
            .iter()
            .map(|p| format!("{}{}", p.base, p.quote))
            .collect();

        format!(
            "chain_id={} validator={} pairs={:?} provider_timeout_ms={} dry_run={}",
            self.account.chain_id,
            self.account.validator,
            pairs,
            self.provider_timeout_ms,
            self.broadcast.endpoint.is_none()
        )
    }
}

impl std::fmt::Display for FeederConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
