//! On-chain oracle params and their block-bounded cache

/// Blocks during which cached params are trusted
pub const PARAMS_CACHE_INTERVAL: i64 = 200;

/// Accept-list entry of the on-chain oracle module
#[derive(Clone, PartialEq, prost::Message)]
pub struct Denom {
    #[prost(string, tag = "1")]
    pub base_denom: String,
    #[prost(string, tag = "2")]
    pub symbol_denom: String,
    #[prost(uint32, tag = "3")]
    pub exponent: u32,
}

/// Subset of the oracle module params the feeder reads
#[derive(Clone, PartialEq, prost::Message)]
pub struct OracleParams {
    #[prost(uint64, tag = "1")]
    pub vote_period: u64,
    #[prost(message, repeated, tag = "5")]
    pub accept_list: Vec<Denom>,
}

#[derive(Debug, Clone, Default)]
pub struct ParamCache {
    params: Option<OracleParams>,
    last_updated_block: i64,
}

impl ParamCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, current_height: i64, params: OracleParams) {
        self.last_updated_block = current_height;
        self.params = Some(params);
    }

    pub fn params(&self) -> Option<&OracleParams> {
        self.params.as_ref()
    }

    pub fn last_updated_block(&self) -> i64 {
        self.last_updated_block
    }

    /// True when the params must be fetched again at `current_height`.
    pub fn is_outdated(&self, current_height: i64) -> bool {
        if self.params.is_none() {
            return true;
        }

        // chain reported a height below the last refresh
        if current_height < self.last_updated_block {
            return true;
        }

        if current_height < PARAMS_CACHE_INTERVAL {
            return false;
        }

        current_height - self.last_updated_block > PARAMS_CACHE_INTERVAL
    }
}
