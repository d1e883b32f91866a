//! Price feeder library
//!
//! Exchange price collection, USD aggregation and oracle prevote/vote
//! submission for a Cosmos chain's oracle module.

pub mod client;
pub mod config;
pub mod error;
pub mod oracle;
pub mod telemetry;
pub mod types;
