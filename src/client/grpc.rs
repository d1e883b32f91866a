//! Oracle params over gRPC
//!
//! One unary call, plaintext transport. The messages are declared by hand
//! with prost derives so no protobuf toolchain is needed at build time.

use anyhow::{Context, Result};
use std::time::Duration;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;

use crate::oracle::param::OracleParams;

/// Client-side deadline of the params query
pub const GRPC_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

const PARAMS_PATH: &str = "/juno.oracle.v1.Query/Params";

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryParamsRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryParamsResponse {
    #[prost(message, optional, tag = "1")]
    pub params: Option<OracleParams>,
}

/// Queries `/juno.oracle.v1.Query/Params` on `endpoint` ("http://host:9090").
pub async fn query_params(endpoint: &str) -> Result<OracleParams> {
    let call = async {
        let channel = Channel::from_shared(endpoint.to_string())
            .with_context(|| format!("Invalid gRPC endpoint {}", endpoint))?
            .connect()
            .await
            .with_context(|| format!("Failed to dial gRPC endpoint {}", endpoint))?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.context("gRPC service not ready")?;

        let codec = ProstCodec::<QueryParamsRequest, QueryParamsResponse>::default();
        let response = grpc
            .unary(
                tonic::Request::new(QueryParamsRequest {}),
                PathAndQuery::from_static(PARAMS_PATH),
                codec,
            )
            .await
            .context("Oracle params query failed")?;

        response
            .into_inner()
            .params
            .context("Oracle params missing from response")
    };

    tokio::time::timeout(GRPC_QUERY_TIMEOUT, call)
        .await
        .context("Oracle params query timed out")?
}
