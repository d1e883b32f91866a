//! Counters for recoverable failures and feed activity
//!
//! Recorded through the `metrics` facade; the host process decides which
//! recorder (if any) is installed.

use metrics::{counter, histogram};
use std::time::Duration;

use crate::oracle::sources::ProviderName;

/// Kind of provider message a counter refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Ticker,
    Candle,
    Pong,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ticker => "ticker",
            MessageType::Candle => "candle",
            MessageType::Pong => "pong",
        }
    }
}

pub fn websocket_reconnect(provider: ProviderName) {
    counter!("websocket_reconnect", "provider" => provider.as_str()).increment(1);
}

pub fn websocket_message(provider: ProviderName, kind: MessageType) {
    counter!(
        "websocket_message",
        "provider" => provider.as_str(),
        "type" => kind.as_str()
    )
    .increment(1);
}

pub fn subscribe_currency_pairs(provider: ProviderName, pairs: usize) {
    counter!("websocket_subscribe_currency_pairs", "provider" => provider.as_str())
        .increment(pairs as u64);
}

pub fn provider_failure(provider: ProviderName, kind: MessageType) {
    counter!(
        "provider_failure",
        "provider" => provider.as_str(),
        "type" => kind.as_str()
    )
    .increment(1);
}

pub fn provider_timeout() {
    counter!("provider_timeout").increment(1);
}

pub fn tick_failure() {
    counter!("tick_failure").increment(1);
}

pub fn tick_new(runtime: Duration) {
    histogram!("tick_runtime_seconds").record(runtime.as_secs_f64());
    counter!("tick_new").increment(1);
}

pub fn vote_missed() {
    counter!("vote_failure_missed").increment(1);
}

pub fn price_filtered(base: &str) {
    counter!("price_deviation_filtered", "base" => base.to_string()).increment(1);
}
