//! Chain client
//!
//! The oracle only talks to the chain through [`OracleClient`]: block height,
//! oracle params and prevote/vote broadcast. Signing keys never enter this
//! process; [`RpcOracleClient`] hands unsigned messages to an external signer.

mod grpc;
mod rpc;

pub use grpc::{query_params, QueryParamsRequest, QueryParamsResponse, GRPC_QUERY_TIMEOUT};
pub use rpc::{BroadcastSettings, RpcOracleClient};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::oracle::param::OracleParams;

/// Commit half of the aggregate vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAggregateExchangeRatePrevote {
    pub hash: String,
    pub feeder: String,
    pub validator: String,
}

/// Reveal half of the aggregate vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAggregateExchangeRateVote {
    pub salt: String,
    pub exchange_rates: String,
    pub feeder: String,
    pub validator: String,
}

/// Messages the feeder broadcasts, tagged with their amino type names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum OracleMsg {
    #[serde(rename = "juno/oracle/MsgAggregateExchangeRatePrevote")]
    Prevote(MsgAggregateExchangeRatePrevote),
    #[serde(rename = "juno/oracle/MsgAggregateExchangeRateVote")]
    Vote(MsgAggregateExchangeRateVote),
}

impl OracleMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            OracleMsg::Prevote(_) => "prevote",
            OracleMsg::Vote(_) => "vote",
        }
    }
}

/// Everything the oracle needs from the chain
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Latest committed block height.
    async fn chain_height(&self) -> Result<i64>;

    /// Broadcasts `msg`, giving up once the chain passes
    /// `next_height + timeout_blocks`.
    async fn broadcast_tx(&self, next_height: i64, timeout_blocks: i64, msg: OracleMsg)
        -> Result<()>;

    /// Current on-chain oracle params.
    async fn query_params(&self) -> Result<OracleParams>;

    fn validator_addr(&self) -> String;

    fn feeder_addr(&self) -> String;
}
