//! Oracle module - exchange rate aggregation and on-chain voting
//!
//! Every tick the oracle pulls tickers and candles from all configured
//! providers, reduces them to one USD price per base, and walks the
//! prevote/vote state machine against the chain's vote periods.

pub mod aggregator;
pub mod candles;
pub mod convert;
pub mod filter;
pub mod param;
pub mod sources;
pub mod vote;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{
    MsgAggregateExchangeRatePrevote, MsgAggregateExchangeRateVote, OracleClient, OracleMsg,
};
use crate::config::CurrencyPairConfig;
use crate::error::FeederError;
use crate::telemetry::{self, MessageType};
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

pub use aggregator::PricesByProvider;
use aggregator::{
    compute_tvwap, compute_tvwaps_by_provider, compute_vwap, compute_vwaps_by_provider,
};
use convert::{convert_candles_to_usd, convert_tickers_to_usd};
pub use convert::ProviderPairs;
use filter::{filter_candle_deviations, filter_ticker_deviations};
use param::{OracleParams, ParamCache};
use sources::{
    new_provider, AggregatedProviderCandles, AggregatedProviderPrices, Endpoint, Provider,
    ProviderName,
};
use vote::{aggregate_vote_hash, generate_exchange_rates_string, generate_salt};

/// Pause between ticks
pub const TICKER_SLEEP: Duration = Duration::from_secs(1);

/// Random bytes in a prevote salt
const SALT_LENGTH: usize = 32;

type ProviderResponse = (HashMap<String, TickerPrice>, HashMap<String, Vec<CandlePrice>>);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Commit kept between the prevote and its reveal. Salt and rates are
/// replayed verbatim in the vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousPrevote {
    pub exchange_rates: String,
    pub salt: String,
    pub submit_block_height: i64,
}

/// Per-provider price snapshot handed out as deep copies
#[derive(Debug, Default)]
pub struct PricesWithMutex {
    prices: RwLock<PricesByProvider>,
}

impl PricesWithMutex {
    pub fn set_prices(&self, prices: PricesByProvider) {
        *write(&self.prices) = prices;
    }

    pub fn get_prices_clone(&self) -> PricesByProvider {
        read(&self.prices).clone()
    }
}

#[derive(Debug, Default)]
struct VoteState {
    previous_prevote: Option<PreviousPrevote>,
    /// 0 while no prevote is outstanding
    previous_vote_period: i64,
    param_cache: ParamCache,
}

/// Flattens one provider's responses for `pair` into the aggregated maps,
/// keyed by base. Returns whether a ticker or a candle window was found.
pub fn set_provider_ticker_prices_and_candles(
    provider: ProviderName,
    provider_prices: &mut AggregatedProviderPrices,
    provider_candles: &mut AggregatedProviderCandles,
    prices: &HashMap<String, TickerPrice>,
    candles: &HashMap<String, Vec<CandlePrice>>,
    pair: &CurrencyPair,
) -> bool {
    let symbol = pair.symbol();
    let ticker = prices.get(&symbol);
    let window = candles.get(&symbol);

    if let Some(ticker) = ticker {
        provider_prices
            .entry(provider)
            .or_default()
            .insert(pair.base.clone(), *ticker);
    }
    if let Some(window) = window {
        provider_candles
            .entry(provider)
            .or_default()
            .insert(pair.base.clone(), window.clone());
    }

    ticker.is_some() || window.is_some()
}

/// Price oracle: provider registry, computed prices and vote state
pub struct Oracle {
    client: Arc<dyn OracleClient>,
    provider_pairs: ProviderPairs,
    provider_timeout: Duration,
    deviations: HashMap<String, Decimal>,
    endpoints: HashMap<ProviderName, Endpoint>,
    providers: Mutex<HashMap<ProviderName, Arc<dyn Provider>>>,
    vote_state: tokio::sync::Mutex<VoteState>,
    prices: RwLock<HashMap<String, Decimal>>,
    last_price_sync: RwLock<Option<DateTime<Utc>>>,
    tvwaps_by_provider: PricesWithMutex,
    vwaps_by_provider: PricesWithMutex,
    shutdown: CancellationToken,
    running: watch::Sender<bool>,
}

impl Oracle {
    pub fn new(
        client: Arc<dyn OracleClient>,
        currency_pairs: &[CurrencyPairConfig],
        provider_timeout: Duration,
        deviations: HashMap<String, Decimal>,
        endpoints: HashMap<ProviderName, Endpoint>,
    ) -> Result<Self> {
        let mut provider_pairs: ProviderPairs = HashMap::new();
        for pair in currency_pairs {
            for name in &pair.providers {
                let name: ProviderName = name.parse()?;
                provider_pairs
                    .entry(name)
                    .or_default()
                    .push(CurrencyPair::new(
                        pair.base.to_uppercase(),
                        pair.quote.to_uppercase(),
                    ));
            }
        }

        let (running, _) = watch::channel(false);

        Ok(Self {
            client,
            provider_pairs,
            provider_timeout,
            deviations,
            endpoints,
            providers: Mutex::new(HashMap::new()),
            vote_state: tokio::sync::Mutex::new(VoteState::default()),
            prices: RwLock::new(HashMap::new()),
            last_price_sync: RwLock::new(None),
            tvwaps_by_provider: PricesWithMutex::default(),
            vwaps_by_provider: PricesWithMutex::default(),
            shutdown: CancellationToken::new(),
            running,
        })
    }

    /// Installs an already built provider instead of the default one.
    pub fn register_provider(&self, name: ProviderName, provider: Arc<dyn Provider>) {
        lock(&self.providers).insert(name, provider);
    }

    pub fn provider_pairs(&self) -> &ProviderPairs {
        &self.provider_pairs
    }

    async fn get_or_set_provider(&self, name: ProviderName) -> Result<Arc<dyn Provider>> {
        let existing = lock(&self.providers).get(&name).cloned();
        if let Some(provider) = existing {
            return Ok(provider);
        }

        let pairs = self
            .provider_pairs
            .get(&name)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let provider = new_provider(
            name,
            self.endpoints.get(&name),
            pairs,
            self.shutdown.child_token(),
        )
        .await
        .with_context(|| format!("Failed to start provider {}", name))?;

        lock(&self.providers).insert(name, Arc::clone(&provider));
        Ok(provider)
    }

    async fn fetch_provider<'a>(
        &self,
        name: ProviderName,
        provider: Arc<dyn Provider>,
        pairs: &'a [CurrencyPair],
    ) -> (
        ProviderName,
        &'a [CurrencyPair],
        Result<Result<ProviderResponse>, tokio::time::error::Elapsed>,
    ) {
        let fetch = async {
            let prices = provider.get_ticker_prices(pairs).await.map_err(|e| {
                telemetry::provider_failure(name, MessageType::Ticker);
                e
            })?;
            let candles = provider.get_candle_prices(pairs).await.map_err(|e| {
                telemetry::provider_failure(name, MessageType::Candle);
                e
            })?;
            Ok::<_, anyhow::Error>((prices, candles))
        };

        let result = tokio::time::timeout(self.provider_timeout, fetch).await;
        (name, pairs, result)
    }

    /// Collects prices from every provider concurrently and replaces the
    /// computed prices. Fails when a provider times out or when a required
    /// base ends up without a price.
    pub async fn set_prices(&self) -> Result<()> {
        let mut required_rates = HashSet::new();
        let mut fetches = Vec::with_capacity(self.provider_pairs.len());

        for (name, pairs) in &self.provider_pairs {
            let provider = self.get_or_set_provider(*name).await?;
            required_rates.extend(pairs.iter().map(|pair| pair.base.clone()));
            fetches.push(self.fetch_provider(*name, provider, pairs));
        }

        let mut provider_prices: AggregatedProviderPrices = HashMap::new();
        let mut provider_candles: AggregatedProviderCandles = HashMap::new();
        let mut timed_out = false;

        for (name, pairs, result) in join_all(fetches).await {
            let (prices, candles) = match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::error!(provider = %name, error = %e, "Failed to get prices from provider");
                    continue;
                }
                Err(_) => {
                    telemetry::provider_timeout();
                    tracing::error!(provider = %name, "Provider timed out");
                    timed_out = true;
                    continue;
                }
            };

            for pair in pairs {
                let found = set_provider_ticker_prices_and_candles(
                    name,
                    &mut provider_prices,
                    &mut provider_candles,
                    &prices,
                    &candles,
                    pair,
                );
                if !found {
                    tracing::warn!(provider = %name, pair = %pair, "No exchange rates in provider response");
                }
            }
        }

        if timed_out {
            return Err(FeederError::ProviderTimeout.into());
        }

        let computed = self.get_computed_prices(&provider_candles, &provider_prices)?;

        let mut missing: Vec<&String> = required_rates
            .iter()
            .filter(|base| !computed.contains_key(*base))
            .collect();
        missing.sort();
        if let Some(base) = missing.first() {
            return Err(FeederError::MissingRate(base.to_string()).into());
        }

        *write(&self.prices) = computed;
        Ok(())
    }

    /// TVWAP of the converted, filtered candles; VWAP of the tickers when
    /// no candle survives.
    pub fn get_computed_prices(
        &self,
        provider_candles: &AggregatedProviderCandles,
        provider_prices: &AggregatedProviderPrices,
    ) -> Result<HashMap<String, Decimal>> {
        let converted_candles =
            convert_candles_to_usd(provider_candles, &self.provider_pairs, &self.deviations)?;
        let filtered_candles = filter_candle_deviations(&converted_candles, &self.deviations)?;

        self.tvwaps_by_provider
            .set_prices(compute_tvwaps_by_provider(&filtered_candles).unwrap_or_default());

        let tvwap_prices = compute_tvwap(&filtered_candles)?;
        if !tvwap_prices.is_empty() {
            return Ok(tvwap_prices);
        }

        let converted_tickers =
            convert_tickers_to_usd(provider_prices, &self.provider_pairs, &self.deviations)?;
        let filtered_tickers = filter_ticker_deviations(&converted_tickers, &self.deviations)?;

        self.vwaps_by_provider
            .set_prices(compute_vwaps_by_provider(&filtered_tickers));

        Ok(compute_vwap(&filtered_tickers))
    }

    /// Copy of the last computed prices.
    pub fn get_prices(&self) -> HashMap<String, Decimal> {
        read(&self.prices).clone()
    }

    pub fn get_last_price_sync_timestamp(&self) -> Option<DateTime<Utc>> {
        *read(&self.last_price_sync)
    }

    pub fn get_tvwap_prices(&self) -> PricesByProvider {
        self.tvwaps_by_provider.get_prices_clone()
    }

    pub fn get_vwap_prices(&self) -> PricesByProvider {
        self.vwaps_by_provider.get_prices_clone()
    }

    /// The outstanding prevote, if any.
    pub async fn previous_prevote(&self) -> Option<PreviousPrevote> {
        self.vote_state.lock().await.previous_prevote.clone()
    }

    /// Oracle params, queried again once the cache is outdated at `height`.
    pub async fn get_param_cache(&self, height: i64) -> Result<OracleParams> {
        let mut state = self.vote_state.lock().await;
        self.refresh_params(&mut state, height).await
    }

    async fn refresh_params(&self, state: &mut VoteState, height: i64) -> Result<OracleParams> {
        if !state.param_cache.is_outdated(height) {
            if let Some(params) = state.param_cache.params() {
                return Ok(params.clone());
            }
        }

        let params = self.client.query_params().await?;
        self.check_accept_list(&params);
        state.param_cache.update(height, params.clone());
        Ok(params)
    }

    fn check_accept_list(&self, params: &OracleParams) {
        let prices = read(&self.prices);
        for denom in &params.accept_list {
            let symbol = denom.symbol_denom.to_uppercase();
            if !prices.contains_key(&symbol) {
                tracing::warn!(denom = %symbol, "Price missing for required denom");
            }
        }
    }

    /// One pass of price collection and the prevote/vote state machine.
    pub async fn tick(&self) -> Result<()> {
        tracing::debug!("Executing oracle tick");

        let block_height = self.client.chain_height().await?;
        if block_height < 1 {
            return Err(FeederError::InvalidBlockHeight(block_height).into());
        }

        let mut state = self.vote_state.lock().await;
        let params = self.refresh_params(&mut state, block_height).await?;

        self.set_prices().await?;

        let vote_period = i64::try_from(params.vote_period).context("Vote period out of range")?;
        if vote_period < 1 {
            bail!("oracle vote period must be positive");
        }

        let next_block_height = block_height + 1;
        let current_vote_period = next_block_height / vote_period;
        let index_in_vote_period = next_block_height % vote_period;

        // already prevoted this period, or too close to its end to land a tx
        if (state.previous_vote_period != 0 && current_vote_period == state.previous_vote_period)
            || vote_period - index_in_vote_period < 2
        {
            tracing::info!(
                vote_period,
                previous_vote_period = state.previous_vote_period,
                current_vote_period,
                "Skipping until next voting period"
            );
            return Ok(());
        }

        if state.previous_vote_period != 0
            && current_vote_period - state.previous_vote_period != 1
        {
            tracing::info!(
                vote_period,
                previous_vote_period = state.previous_vote_period,
                current_vote_period,
                "Missing vote during voting period"
            );
            telemetry::vote_missed();

            state.previous_vote_period = 0;
            state.previous_prevote = None;
            return Ok(());
        }

        let validator = self.client.validator_addr();
        let feeder = self.client.feeder_addr();

        match state.previous_prevote.clone() {
            None => {
                let salt = generate_salt(SALT_LENGTH)?;
                let exchange_rates = generate_exchange_rates_string(&self.get_prices());
                let hash = aggregate_vote_hash(&salt, &exchange_rates, &validator);

                tracing::info!(
                    hash = %hash,
                    validator = %validator,
                    feeder = %feeder,
                    "Broadcasting pre-vote"
                );
                let msg = OracleMsg::Prevote(MsgAggregateExchangeRatePrevote {
                    hash,
                    feeder,
                    validator,
                });
                self.client
                    .broadcast_tx(next_block_height, vote_period * 2, msg)
                    .await?;

                let current_height = self.client.chain_height().await?;
                state.previous_vote_period = current_height / vote_period;
                state.previous_prevote = Some(PreviousPrevote {
                    exchange_rates,
                    salt,
                    submit_block_height: current_height,
                });
            }
            Some(prevote) => {
                tracing::info!(
                    exchange_rates = %prevote.exchange_rates,
                    validator = %validator,
                    feeder = %feeder,
                    "Broadcasting vote"
                );
                let msg = OracleMsg::Vote(MsgAggregateExchangeRateVote {
                    salt: prevote.salt,
                    exchange_rates: prevote.exchange_rates,
                    feeder,
                    validator,
                });
                self.client
                    .broadcast_tx(
                        next_block_height,
                        vote_period - index_in_vote_period,
                        msg,
                    )
                    .await?;

                state.previous_prevote = None;
                state.previous_vote_period = 0;
            }
        }

        Ok(())
    }

    async fn run(&self, cancel: &CancellationToken) {
        // a tick in flight always completes so its vote state is recorded
        while !cancel.is_cancelled() && !self.shutdown.is_cancelled() {
            tracing::debug!("Starting oracle tick");
            let started = Instant::now();

            if let Err(e) = self.tick().await {
                telemetry::tick_failure();
                tracing::error!(error = %e, "Oracle tick failed");
            }

            *write(&self.last_price_sync) = Some(Utc::now());
            telemetry::tick_new(started.elapsed());

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(TICKER_SLEEP) => {}
            }
        }
    }

    /// Ticks until `cancel` fires or [`Oracle::stop`] is called, letting the
    /// current tick finish. Provider background tasks are shut down on return.
    pub async fn start(&self, cancel: CancellationToken) {
        self.running.send_replace(true);

        self.run(&cancel).await;

        self.shutdown.cancel();
        self.running.send_replace(false);
        tracing::info!("Oracle stopped");
    }

    /// Signals the tick loop and waits until it has returned.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }
}
