//! Composite request/response envelopes for the two dialects.

pub mod graph;
pub mod rest;

use crate::call::ApiCall;
use crate::error::BridgeResult;
use crate::types::{BridgeConfig, Dialect, ResponseEntry, TransportRequest, TransportResponse};

/// Sub-responses as found on the wire, before pairing with requests.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEntries {
    /// Matched by position (REST multipart).
    Positional(Vec<ResponseEntry>),
    /// Matched by request id (Graph JSON).
    Identified(Vec<(String, ResponseEntry)>),
}

/// One physical `$batch` request carrying `calls` in order.
pub fn encode(dialect: Dialect, config: &BridgeConfig, calls: &[&ApiCall]) -> BridgeResult<TransportRequest> {
    match dialect {
        Dialect::Rest => rest::encode(config, calls),
        Dialect::Graph => graph::encode(config, calls),
    }
}

pub fn decode(dialect: Dialect, response: &TransportResponse) -> BridgeResult<DecodedEntries> {
    match dialect {
        Dialect::Rest => rest::decode(response).map(DecodedEntries::Positional),
        Dialect::Graph => graph::decode(response).map(DecodedEntries::Identified),
    }
}
