//! Error taxonomy for the feeder
//!
//! Connectivity errors are recovered by the websocket controller, data and
//! protocol errors abort a single tick. Nothing here terminates the process.

use thiserror::Error;

use crate::oracle::sources::ProviderName;

#[derive(Debug, Error)]
pub enum FeederError {
    #[error("{provider} failed to get ticker price for {symbol}")]
    TickerNotFound {
        provider: ProviderName,
        symbol: String,
    },

    #[error("{provider} failed to get candle prices for {symbol}")]
    CandleNotFound {
        provider: ProviderName,
        symbol: String,
    },

    #[error("error connecting to {provider} websocket: {source}")]
    WebsocketDial {
        provider: ProviderName,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("error sending to {provider} websocket: {source}")]
    WebsocketSend {
        provider: ProviderName,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("error reading from {provider} websocket: {source}")]
    WebsocketRead {
        provider: ProviderName,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("error closing {provider} websocket: {source}")]
    WebsocketClose {
        provider: ProviderName,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("missing exchange rate for {0}")]
    MissingExchangeRate(String),

    #[error("duplicate token found in {provider} response: {symbol}")]
    DuplicateToken {
        provider: ProviderName,
        symbol: String,
    },

    #[error("provider timed out")]
    ProviderTimeout,

    #[error("reported prices were not equal to required rates, missed: {0}")]
    MissingRate(String),

    #[error("there are no valid conversion rates for {0}")]
    NoConversionRates(String),

    #[error("there are no providers with a USD based conversion rate for {0}")]
    NoUsdProviders(String),

    #[error("unable to divide by zero: tvwap period for {0} is empty")]
    TvwapPeriod(String),

    #[error("expected positive block height, got {0}")]
    InvalidBlockHeight(i64),

    #[error("salt length must be positive")]
    InvalidSaltLength,

    #[error("unsupported provider: {0}")]
    ProviderNotFound(String),

    #[error("invalid exchange rate {0}")]
    InvalidExchangeRate(String),

    #[error("duplicated denom {0}")]
    DuplicateDenom(String),
}
