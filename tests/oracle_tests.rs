//! Oracle end-to-end: price collection and the prevote/vote state machine
//! against mock providers and a mocked chain client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mockall::mock;
use price_feeder::client::{OracleClient, OracleMsg};
use price_feeder::config::CurrencyPairConfig;
use price_feeder::error::FeederError;
use price_feeder::oracle::param::OracleParams;
use price_feeder::oracle::sources::{Provider, ProviderName};
use price_feeder::oracle::vote::aggregate_vote_hash;
use price_feeder::oracle::Oracle;
use price_feeder::types::{CandlePrice, CurrencyPair, TickerPrice};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const VALIDATOR: &str = "junovaloper1v9jxgu33ta047h6lta047h6lta047h6l8rg8h5";
const FEEDER: &str = "juno1v9jxgu33ta047h6lta047h6lta047h6lhfwzl5";
const VOTE_PERIOD: u64 = 5;

mock! {
    pub Chain {}

    #[async_trait]
    impl OracleClient for Chain {
        async fn chain_height(&self) -> Result<i64>;
        async fn broadcast_tx(
            &self,
            next_height: i64,
            timeout_blocks: i64,
            msg: OracleMsg,
        ) -> Result<()>;
        async fn query_params(&self) -> Result<OracleParams>;
        fn validator_addr(&self) -> String;
        fn feeder_addr(&self) -> String;
    }
}

/// Provider answering from a fixed ticker table
struct StaticProvider {
    name: ProviderName,
    tickers: HashMap<String, TickerPrice>,
    delay: Duration,
}

impl StaticProvider {
    fn new(name: ProviderName, tickers: &[(&str, Decimal)]) -> Self {
        Self {
            name,
            tickers: tickers
                .iter()
                .map(|(symbol, price)| (symbol.to_string(), TickerPrice::new(*price, dec!(1000))))
                .collect(),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    async fn get_ticker_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, TickerPrice>> {
        tokio::time::sleep(self.delay).await;
        Ok(pairs
            .iter()
            .filter_map(|p| self.tickers.get(&p.symbol()).map(|t| (p.symbol(), *t)))
            .collect())
    }

    async fn get_candle_prices(
        &self,
        _pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>> {
        Ok(HashMap::new())
    }

    async fn subscribe_currency_pairs(&self, _pairs: &[CurrencyPair]) -> Result<()> {
        Ok(())
    }

    async fn get_available_pairs(&self) -> Result<HashSet<String>> {
        Ok(self.tickers.keys().cloned().collect())
    }
}

fn pair(base: &str, quote: &str, provider: &str) -> CurrencyPairConfig {
    CurrencyPairConfig {
        base: base.to_string(),
        quote: quote.to_string(),
        providers: vec![provider.to_string()],
    }
}

/// Five pairs over five providers covering JUNO, USDT, ATOM and OSMO
fn currency_pairs() -> Vec<CurrencyPairConfig> {
    vec![
        pair("JUNO", "USDT", "binance"),
        pair("JUNO", "USDT", "bybit"),
        pair("USDT", "USD", "coinbase"),
        pair("ATOM", "USD", "mexc"),
        pair("OSMO", "USD", "osmosis"),
    ]
}

fn providers() -> Vec<StaticProvider> {
    vec![
        StaticProvider::new(ProviderName::Binance, &[("JUNOUSDT", dec!(3.72))]),
        StaticProvider::new(ProviderName::Bybit, &[("JUNOUSDT", dec!(3.71))]),
        StaticProvider::new(ProviderName::Coinbase, &[("USDTUSD", dec!(1))]),
        StaticProvider::new(ProviderName::Mexc, &[("ATOMUSD", dec!(40.13))]),
        StaticProvider::new(ProviderName::Osmosis, &[("OSMOUSD", dec!(8.69))]),
    ]
}

fn build_oracle(client: MockChain, providers: Vec<StaticProvider>, timeout: Duration) -> Oracle {
    let oracle = Oracle::new(
        Arc::new(client),
        &currency_pairs(),
        timeout,
        HashMap::new(),
        HashMap::new(),
    )
    .unwrap();

    for provider in providers {
        oracle.register_provider(provider.name, Arc::new(provider));
    }
    oracle
}

type Broadcasts = Arc<Mutex<Vec<(i64, i64, OracleMsg)>>>;

/// Chain mock whose height follows `height` and which records broadcasts
fn chain(height: Arc<AtomicI64>, broadcasts: Broadcasts) -> MockChain {
    let mut chain = MockChain::new();
    chain
        .expect_chain_height()
        .returning(move || Ok(height.load(Ordering::SeqCst)));
    chain.expect_query_params().returning(|| {
        Ok(OracleParams {
            vote_period: VOTE_PERIOD,
            accept_list: Vec::new(),
        })
    });
    chain
        .expect_broadcast_tx()
        .returning(move |next_height, timeout_blocks, msg| {
            broadcasts
                .lock()
                .unwrap()
                .push((next_height, timeout_blocks, msg));
            Ok(())
        });
    chain.expect_validator_addr().return_const(VALIDATOR.to_string());
    chain.expect_feeder_addr().return_const(FEEDER.to_string());
    chain
}

#[tokio::test]
async fn test_set_prices_covers_required_bases() {
    let oracle = build_oracle(MockChain::new(), providers(), Duration::from_secs(1));

    assert_ok!(oracle.set_prices().await);

    let prices = oracle.get_prices();
    assert_eq!(prices.len(), 4);
    assert_eq!(prices["JUNO"], dec!(3.715));
    assert_eq!(prices["USDT"], dec!(1));
    assert_eq!(prices["ATOM"], dec!(40.13));
    assert_eq!(prices["OSMO"], dec!(8.69));

    let vwaps = oracle.get_vwap_prices();
    assert_eq!(vwaps[&ProviderName::Binance]["JUNO"], dec!(3.72));
    assert_eq!(vwaps[&ProviderName::Bybit]["JUNO"], dec!(3.71));
}

#[tokio::test]
async fn test_set_prices_names_missing_base() {
    let mut providers = providers();
    providers.retain(|p| p.name != ProviderName::Mexc);
    providers.push(StaticProvider::new(ProviderName::Mexc, &[]));
    let oracle = build_oracle(MockChain::new(), providers, Duration::from_secs(1));

    let err = oracle.set_prices().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "reported prices were not equal to required rates, missed: ATOM"
    );
    assert!(oracle.get_prices().is_empty());
}

#[tokio::test]
async fn test_set_prices_fails_on_provider_timeout() {
    let mut providers = providers();
    providers.retain(|p| p.name != ProviderName::Osmosis);
    providers.push(
        StaticProvider::new(ProviderName::Osmosis, &[("OSMOUSD", dec!(8.69))])
            .with_delay(Duration::from_millis(500)),
    );
    let oracle = build_oracle(MockChain::new(), providers, Duration::from_millis(50));

    let err = assert_err!(oracle.set_prices().await);
    assert!(matches!(
        err.downcast_ref::<FeederError>(),
        Some(FeederError::ProviderTimeout)
    ));
}

#[tokio::test]
async fn test_prevote_then_vote_reveals_committed_rates() {
    let height = Arc::new(AtomicI64::new(9));
    let broadcasts: Broadcasts = Arc::default();
    let oracle = build_oracle(
        chain(height.clone(), broadcasts.clone()),
        providers(),
        Duration::from_secs(1),
    );

    // next block 10 opens vote period 2
    oracle.tick().await.unwrap();
    let prevote = oracle.previous_prevote().await.unwrap();
    assert_eq!(prevote.submit_block_height, 9);

    height.store(10, Ordering::SeqCst);
    oracle.tick().await.unwrap();
    assert!(oracle.previous_prevote().await.is_none());

    let sent = broadcasts.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);

    let (next_height, timeout_blocks, OracleMsg::Prevote(prevote_msg)) = &sent[0] else {
        panic!("expected prevote first, got {:?}", sent[0]);
    };
    assert_eq!((*next_height, *timeout_blocks), (10, 10));
    assert_eq!(prevote_msg.validator, VALIDATOR);
    assert_eq!(prevote_msg.feeder, FEEDER);

    let (next_height, timeout_blocks, OracleMsg::Vote(vote_msg)) = &sent[1] else {
        panic!("expected vote second, got {:?}", sent[1]);
    };
    assert_eq!((*next_height, *timeout_blocks), (11, 4));
    assert_eq!(
        vote_msg.exchange_rates,
        "ATOM:40.130000000000000000,JUNO:3.715000000000000000,OSMO:8.690000000000000000,USDT:1.000000000000000000"
    );
    assert_eq!(
        aggregate_vote_hash(&vote_msg.salt, &vote_msg.exchange_rates, VALIDATOR),
        prevote_msg.hash
    );
}

#[tokio::test]
async fn test_tick_skips_end_of_period_and_same_period() {
    let height = Arc::new(AtomicI64::new(8));
    let broadcasts: Broadcasts = Arc::default();
    let oracle = build_oracle(
        chain(height.clone(), broadcasts.clone()),
        providers(),
        Duration::from_secs(1),
    );

    // next block 9 is the last of its period
    assert_ok!(oracle.tick().await);
    assert!(broadcasts.lock().unwrap().is_empty());

    // prevote at 5 lands in period 1, a tick at 6 is still period 1
    height.store(5, Ordering::SeqCst);
    oracle.tick().await.unwrap();
    height.store(6, Ordering::SeqCst);
    oracle.tick().await.unwrap();

    let sent = broadcasts.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].2, OracleMsg::Prevote(_)));
}

#[tokio::test]
async fn test_missed_vote_resets_state() {
    let height = Arc::new(AtomicI64::new(9));
    let broadcasts: Broadcasts = Arc::default();
    let oracle = build_oracle(
        chain(height.clone(), broadcasts.clone()),
        providers(),
        Duration::from_secs(1),
    );

    oracle.tick().await.unwrap();
    assert!(oracle.previous_prevote().await.is_some());

    // three periods later the prevote can no longer be revealed
    height.store(20, Ordering::SeqCst);
    oracle.tick().await.unwrap();
    assert!(oracle.previous_prevote().await.is_none());
    assert_eq!(broadcasts.lock().unwrap().len(), 1);

    // the next eligible tick starts over with a prevote
    oracle.tick().await.unwrap();
    let sent = broadcasts.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert!(matches!(sent[1].2, OracleMsg::Prevote(_)));
}

#[tokio::test]
async fn test_failed_broadcast_keeps_no_prevote() {
    let mut chain = MockChain::new();
    chain.expect_chain_height().returning(|| Ok(9));
    chain.expect_query_params().returning(|| {
        Ok(OracleParams {
            vote_period: VOTE_PERIOD,
            accept_list: Vec::new(),
        })
    });
    chain
        .expect_broadcast_tx()
        .returning(|_, _, _| Err(anyhow!("broadcast timed out")));
    chain.expect_validator_addr().return_const(VALIDATOR.to_string());
    chain.expect_feeder_addr().return_const(FEEDER.to_string());

    let oracle = build_oracle(chain, providers(), Duration::from_secs(1));

    let err = oracle.tick().await.unwrap_err();
    assert_eq!(err.to_string(), "broadcast timed out");
    assert!(oracle.previous_prevote().await.is_none());
}

#[tokio::test]
async fn test_failed_vote_keeps_prevote_for_retry() {
    let height = Arc::new(AtomicI64::new(9));
    let broadcasts: Broadcasts = Arc::default();
    let fail_votes = Arc::new(AtomicBool::new(true));

    let mut chain = MockChain::new();
    let chain_height = height.clone();
    chain
        .expect_chain_height()
        .returning(move || Ok(chain_height.load(Ordering::SeqCst)));
    chain.expect_query_params().returning(|| {
        Ok(OracleParams {
            vote_period: VOTE_PERIOD,
            accept_list: Vec::new(),
        })
    });
    let sent = broadcasts.clone();
    let failing = fail_votes.clone();
    chain
        .expect_broadcast_tx()
        .returning(move |next_height, timeout_blocks, msg| {
            let is_vote = matches!(msg, OracleMsg::Vote(_));
            sent.lock().unwrap().push((next_height, timeout_blocks, msg));
            if is_vote && failing.load(Ordering::SeqCst) {
                return Err(anyhow!("broadcast timed out"));
            }
            Ok(())
        });
    chain.expect_validator_addr().return_const(VALIDATOR.to_string());
    chain.expect_feeder_addr().return_const(FEEDER.to_string());

    let oracle = build_oracle(chain, providers(), Duration::from_secs(1));

    oracle.tick().await.unwrap();
    let prevote = oracle.previous_prevote().await.unwrap();

    height.store(10, Ordering::SeqCst);
    assert_err!(oracle.tick().await);
    assert_eq!(oracle.previous_prevote().await, Some(prevote.clone()));

    // next block 12 is still inside the reveal period
    fail_votes.store(false, Ordering::SeqCst);
    height.store(11, Ordering::SeqCst);
    assert_ok!(oracle.tick().await);
    assert!(oracle.previous_prevote().await.is_none());

    let sent = broadcasts.lock().unwrap().clone();
    assert_eq!(sent.len(), 3);
    let OracleMsg::Prevote(prevote_msg) = &sent[0].2 else {
        panic!("expected prevote first, got {:?}", sent[0]);
    };
    let votes: Vec<_> = sent[1..]
        .iter()
        .map(|(_, _, msg)| match msg {
            OracleMsg::Vote(vote) => vote.clone(),
            other => panic!("expected vote, got {:?}", other),
        })
        .collect();

    assert_eq!(votes[0], votes[1]);
    assert_eq!(votes[1].salt, prevote.salt);
    assert_eq!(
        aggregate_vote_hash(&votes[1].salt, &votes[1].exchange_rates, VALIDATOR),
        prevote_msg.hash
    );
}

/// Chain client whose broadcast takes a while to land
struct SlowBroadcastChain {
    started: Notify,
    finished: AtomicBool,
}

#[async_trait]
impl OracleClient for SlowBroadcastChain {
    async fn chain_height(&self) -> Result<i64> {
        Ok(9)
    }

    async fn broadcast_tx(&self, _: i64, _: i64, _: OracleMsg) -> Result<()> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn query_params(&self) -> Result<OracleParams> {
        Ok(OracleParams {
            vote_period: VOTE_PERIOD,
            accept_list: Vec::new(),
        })
    }

    fn validator_addr(&self) -> String {
        VALIDATOR.to_string()
    }

    fn feeder_addr(&self) -> String {
        FEEDER.to_string()
    }
}

#[tokio::test]
async fn test_stop_lets_in_flight_broadcast_finish() {
    let chain = Arc::new(SlowBroadcastChain {
        started: Notify::new(),
        finished: AtomicBool::new(false),
    });
    let oracle = Oracle::new(
        chain.clone(),
        &currency_pairs(),
        Duration::from_secs(1),
        HashMap::new(),
        HashMap::new(),
    )
    .unwrap();
    for provider in providers() {
        oracle.register_provider(provider.name, Arc::new(provider));
    }
    let oracle = Arc::new(oracle);

    let task = {
        let oracle = Arc::clone(&oracle);
        tokio::spawn(async move { oracle.start(CancellationToken::new()).await })
    };

    tokio::time::timeout(Duration::from_secs(5), chain.started.notified())
        .await
        .unwrap();
    oracle.stop().await;

    assert!(chain.finished.load(Ordering::SeqCst));
    let prevote = oracle.previous_prevote().await.unwrap();
    assert_eq!(prevote.submit_block_height, 9);

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_tick_rejects_non_positive_height() {
    let mut chain = MockChain::new();
    chain.expect_chain_height().returning(|| Ok(0));
    let oracle = build_oracle(chain, providers(), Duration::from_secs(1));

    let err = oracle.tick().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeederError>(),
        Some(FeederError::InvalidBlockHeight(0))
    ));
}

#[tokio::test]
async fn test_start_stamps_sync_and_stop_waits() {
    let height = Arc::new(AtomicI64::new(8));
    let broadcasts: Broadcasts = Arc::default();
    let oracle = Arc::new(build_oracle(
        chain(height, broadcasts),
        providers(),
        Duration::from_secs(1),
    ));

    let task = {
        let oracle = Arc::clone(&oracle);
        tokio::spawn(async move { oracle.start(CancellationToken::new()).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while oracle.get_last_price_sync_timestamp().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    oracle.stop().await;
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(oracle.get_prices().len(), 4);
}
