//! Websocket harness shared by every push-based provider
//!
//! [`WebsocketController`] owns the connection: dial, subscribe, keepalive,
//! read, and reconnect on failure or after [`DEFAULT_MAX_CONNECTION_TIME`].
//! [`WebsocketProvider`] wires a controller to a [`PriceStore`] through an
//! exchange specific [`WebsocketAdapter`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::FeederError;
use crate::oracle::candles::provider_stale_cutoff;
use crate::oracle::sources::{
    Endpoint, PriceStore, Provider, ProviderName, DEFAULT_MAX_CONNECTION_TIME,
    DEFAULT_PING_DURATION, DEFAULT_RECONNECT_TIME, DEFAULT_TIMEOUT,
};
use crate::telemetry::{self, MessageType};
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Callback receiving every non-empty text frame that is not a pong
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// How a connection is kept alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// Application level text ping, e.g. "ping"
    Text(&'static str),
    /// Protocol ping frame
    Frame,
    Disabled,
}

impl KeepAlive {
    fn message(&self) -> Option<Message> {
        match self {
            KeepAlive::Text(text) => Some(Message::Text(text.to_string())),
            KeepAlive::Frame => Some(Message::Ping(Vec::new())),
            KeepAlive::Disabled => None,
        }
    }
}

enum ReadExit {
    Cancelled,
    Reconnect,
}

/// Sends subscription messages to a running controller
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    tx: mpsc::UnboundedSender<Vec<serde_json::Value>>,
}

impl SubscriptionHandle {
    /// Queues messages for the live connection; they are also replayed on
    /// every reconnect.
    pub fn subscribe(&self, msgs: Vec<serde_json::Value>) -> Result<()> {
        self.tx
            .send(msgs)
            .map_err(|_| anyhow!("websocket controller is no longer running"))
    }
}

/// Provider agnostic connection manager
pub struct WebsocketController {
    provider: ProviderName,
    url: Url,
    subscription_msgs: Vec<serde_json::Value>,
    keep_alive: KeepAlive,
    handler: MessageHandler,
    cancel: CancellationToken,
    new_subscriptions: mpsc::UnboundedReceiver<Vec<serde_json::Value>>,
    reconnect_delay: Duration,
    ping_interval: Duration,
    max_connection_time: Duration,
}

impl WebsocketController {
    pub fn new(
        provider: ProviderName,
        url: Url,
        subscription_msgs: Vec<serde_json::Value>,
        keep_alive: KeepAlive,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> (Self, SubscriptionHandle) {
        let (tx, new_subscriptions) = mpsc::unbounded_channel();
        let controller = Self {
            provider,
            url,
            subscription_msgs,
            keep_alive,
            handler,
            cancel,
            new_subscriptions,
            reconnect_delay: DEFAULT_RECONNECT_TIME,
            ping_interval: DEFAULT_PING_DURATION,
            max_connection_time: DEFAULT_MAX_CONNECTION_TIME,
        };
        (controller, SubscriptionHandle { tx })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_max_connection_time(mut self, max: Duration) -> Self {
        self.max_connection_time = max;
        self
    }

    /// Runs until the cancellation token fires. Connection failures never
    /// escape; they are logged and retried.
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let stream = match self.connect().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(provider = %self.provider, error = %e, "Websocket connection failed");
                    if self.wait_before_retry().await {
                        continue;
                    }
                    return;
                }
            };

            tracing::info!(provider = %self.provider, "Connected to websocket");
            let (mut write, read) = stream.split();

            if let Err(e) = self.subscribe(&mut write).await {
                tracing::error!(provider = %self.provider, error = %e, "Websocket subscription failed");
                close(self.provider, &mut write).await;
                if self.wait_before_retry().await {
                    continue;
                }
                return;
            }

            match self.read_websocket(write, read).await {
                ReadExit::Cancelled => return,
                ReadExit::Reconnect => {
                    telemetry::websocket_reconnect(self.provider);
                    tracing::info!(provider = %self.provider, "Reconnecting websocket");
                }
            }
        }
    }

    /// Sleeps for the reconnect delay; false when cancelled meanwhile.
    async fn wait_before_retry(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_delay) => true,
        }
    }

    async fn connect(&self) -> std::result::Result<WsStream, FeederError> {
        tracing::debug!(provider = %self.provider, url = %self.url, "Connecting to websocket");

        match tokio::time::timeout(DEFAULT_TIMEOUT, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _))) => Ok(stream),
            Ok(Err(source)) => Err(FeederError::WebsocketDial {
                provider: self.provider,
                source,
            }),
            Err(_) => Err(FeederError::WebsocketDial {
                provider: self.provider,
                source: tungstenite::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "websocket handshake timed out",
                )),
            }),
        }
    }

    async fn subscribe(&mut self, write: &mut WsWrite) -> std::result::Result<(), FeederError> {
        // pick up anything queued while disconnected
        while let Ok(msgs) = self.new_subscriptions.try_recv() {
            self.subscription_msgs.extend(msgs);
        }

        for msg in &self.subscription_msgs {
            tracing::debug!(provider = %self.provider, msg = %msg, "Sending websocket message");
            write
                .send(Message::Text(msg.to_string()))
                .await
                .map_err(|source| FeederError::WebsocketSend {
                    provider: self.provider,
                    source,
                })?;
        }
        Ok(())
    }

    async fn read_websocket(&mut self, mut write: WsWrite, mut read: WsRead) -> ReadExit {
        let mut ping = tokio::time::interval(self.ping_interval);
        let reconnect_at = tokio::time::sleep(self.max_connection_time);
        tokio::pin!(reconnect_at);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    close(self.provider, &mut write).await;
                    return ReadExit::Cancelled;
                }
                _ = &mut reconnect_at => {
                    tracing::info!(provider = %self.provider, "Maximum connection time reached");
                    close(self.provider, &mut write).await;
                    return ReadExit::Reconnect;
                }
                _ = ping.tick() => {
                    if let Some(msg) = self.keep_alive.message() {
                        tracing::debug!(provider = %self.provider, "ping");
                        if let Err(source) = write.send(msg).await {
                            let err = FeederError::WebsocketSend { provider: self.provider, source };
                            tracing::error!(provider = %self.provider, error = %err, "Ping failed");
                        }
                    }
                }
                Some(msgs) = self.new_subscriptions.recv() => {
                    for msg in &msgs {
                        if let Err(source) = write.send(Message::Text(msg.to_string())).await {
                            let err = FeederError::WebsocketSend { provider: self.provider, source };
                            tracing::error!(provider = %self.provider, error = %err, "Subscription failed");
                        }
                    }
                    self.subscription_msgs.extend(msgs);
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.read_success(&text),
                    Some(Ok(Message::Pong(_))) => {
                        telemetry::websocket_message(self.provider, MessageType::Pong);
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::warn!(provider = %self.provider, "Connection closed by server");
                        return ReadExit::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(source)) => {
                        let err = FeederError::WebsocketRead { provider: self.provider, source };
                        tracing::error!(provider = %self.provider, error = %err, "Websocket read failed");
                        close(self.provider, &mut write).await;
                        return ReadExit::Reconnect;
                    }
                    None => {
                        tracing::warn!(provider = %self.provider, "Stream ended");
                        return ReadExit::Reconnect;
                    }
                },
            }
        }
    }

    fn read_success(&self, text: &str) {
        tracing::debug!(provider = %self.provider, frame = %text, "Websocket frame");

        if text.is_empty() {
            return;
        }
        if text == "pong" {
            telemetry::websocket_message(self.provider, MessageType::Pong);
            return;
        }
        (self.handler)(text);
    }
}

async fn close(provider: ProviderName, write: &mut WsWrite) {
    tracing::debug!(provider = %provider, "Closing websocket");
    if let Err(source) = write.close().await {
        let err = FeederError::WebsocketClose { provider, source };
        tracing::debug!(provider = %provider, error = %err, "Websocket close failed");
    }
}

/// A decoded exchange frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameUpdate {
    Ticker { symbol: String, ticker: TickerPrice },
    Candle { symbol: String, candle: CandlePrice },
}

/// Exchange specific half of a websocket provider
#[async_trait]
pub trait WebsocketAdapter: Send + Sync + 'static {
    fn name(&self) -> ProviderName;

    /// Hardcoded hosts used unless an override targets this provider
    fn default_endpoint(&self) -> Endpoint;

    fn websocket_url(&self, endpoint: &Endpoint) -> Result<Url>;

    /// Exchange symbol for a pair, as it appears in frames
    fn exchange_symbol(&self, pair: &CurrencyPair) -> String;

    fn subscription_msgs(&self, pairs: &[CurrencyPair]) -> Result<Vec<serde_json::Value>>;

    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::Text("ping")
    }

    /// Decodes one text frame. Frames without price data yield no updates.
    fn decode(&self, text: &str) -> Result<Vec<FrameUpdate>>;

    async fn available_pairs(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
    ) -> Result<HashSet<String>>;
}

/// Push-based provider built from an adapter
pub struct WebsocketProvider<A: WebsocketAdapter> {
    adapter: Arc<A>,
    endpoint: Endpoint,
    store: Arc<PriceStore>,
    subscribed: Arc<RwLock<HashMap<String, CurrencyPair>>>,
    subscriptions: SubscriptionHandle,
    http: reqwest::Client,
}

impl<A: WebsocketAdapter> WebsocketProvider<A> {
    /// Spawns the controller task; it lives until `cancel` fires.
    pub fn new(
        adapter: A,
        endpoint: Option<&Endpoint>,
        pairs: &[CurrencyPair],
        cancel: CancellationToken,
    ) -> Result<Self> {
        let endpoint = Endpoint::resolve(endpoint, adapter.default_endpoint());
        let url = adapter.websocket_url(&endpoint)?;
        let subscription_msgs = adapter.subscription_msgs(pairs)?;

        let adapter = Arc::new(adapter);
        let store = Arc::new(PriceStore::new());
        let subscribed: HashMap<String, CurrencyPair> = pairs
            .iter()
            .map(|p| (adapter.exchange_symbol(p), p.clone()))
            .collect();
        let subscribed = Arc::new(RwLock::new(subscribed));

        let handler = message_handler(adapter.clone(), store.clone(), subscribed.clone());
        let (controller, subscriptions) = WebsocketController::new(
            adapter.name(),
            url,
            subscription_msgs,
            adapter.keep_alive(),
            handler,
            cancel,
        );
        tokio::spawn(controller.run());
        telemetry::subscribe_currency_pairs(adapter.name(), pairs.len());

        Ok(Self {
            adapter,
            endpoint,
            store,
            subscribed,
            subscriptions,
            http: super::http_client()?,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Decodes frames and records updates for subscribed symbols only.
pub(crate) fn message_handler<A: WebsocketAdapter>(
    adapter: Arc<A>,
    store: Arc<PriceStore>,
    subscribed: Arc<RwLock<HashMap<String, CurrencyPair>>>,
) -> MessageHandler {
    Arc::new(move |text: &str| {
        let name = adapter.name();
        let updates = match adapter.decode(text) {
            Ok(updates) => updates,
            Err(e) => {
                tracing::error!(provider = %name, length = text.len(), error = %e, "Error on receive message");
                return;
            }
        };

        let subscribed = subscribed.read().unwrap_or_else(|p| p.into_inner());
        for update in updates {
            match update {
                FrameUpdate::Ticker { symbol, ticker } => {
                    if subscribed.contains_key(&symbol) {
                        store.set_ticker(&symbol, ticker);
                        telemetry::websocket_message(name, MessageType::Ticker);
                    }
                }
                FrameUpdate::Candle { symbol, candle } => {
                    if subscribed.contains_key(&symbol) {
                        store.add_candle(&symbol, candle, provider_stale_cutoff());
                        telemetry::websocket_message(name, MessageType::Candle);
                    }
                }
            }
        }
    })
}

#[async_trait]
impl<A: WebsocketAdapter> Provider for WebsocketProvider<A> {
    fn name(&self) -> ProviderName {
        self.adapter.name()
    }

    async fn get_ticker_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, TickerPrice>> {
        let mut prices = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let symbol = self.adapter.exchange_symbol(pair);
            let ticker = self
                .store
                .ticker(&symbol)
                .ok_or(FeederError::TickerNotFound {
                    provider: self.name(),
                    symbol,
                })?;
            prices.insert(pair.symbol(), ticker);
        }
        Ok(prices)
    }

    async fn get_candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>> {
        let mut candles = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            let symbol = self.adapter.exchange_symbol(pair);
            let window = self
                .store
                .candles(&symbol)
                .ok_or(FeederError::CandleNotFound {
                    provider: self.name(),
                    symbol,
                })?;
            candles.insert(pair.symbol(), window);
        }
        Ok(candles)
    }

    async fn subscribe_currency_pairs(&self, pairs: &[CurrencyPair]) -> Result<()> {
        let new_pairs: Vec<CurrencyPair> = {
            let mut subscribed = self.subscribed.write().unwrap_or_else(|p| p.into_inner());
            pairs
                .iter()
                .filter(|p| {
                    subscribed
                        .insert(self.adapter.exchange_symbol(p), (*p).clone())
                        .is_none()
                })
                .cloned()
                .collect()
        };

        if new_pairs.is_empty() {
            return Ok(());
        }

        self.subscriptions
            .subscribe(self.adapter.subscription_msgs(&new_pairs)?)?;
        telemetry::subscribe_currency_pairs(self.name(), new_pairs.len());
        Ok(())
    }

    async fn get_available_pairs(&self) -> Result<HashSet<String>> {
        self.adapter.available_pairs(&self.http, &self.endpoint).await
    }
}
