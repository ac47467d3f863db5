//! Graph JSON `$batch`: `{"requests":[..]}` out, `{"responses":[..]}` back,
//! matched by `id`.

use crate::call::ApiCall;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeConfig, Dialect, Payload, ResponseEntry, TransportRequest, TransportResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    requests: Vec<SubRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct SubRequest<'a> {
    id: String,
    method: String,
    url: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    headers: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    responses: Vec<SubResponse>,
}

#[derive(Debug, Deserialize)]
struct SubResponse {
    id: String,
    status: u16,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

/// Request id for the call at `index`.
pub fn request_id(index: usize) -> String {
    (index + 1).to_string()
}

/// Batch URLs are relative to the versioned Graph root.
fn relative_url(config: &BridgeConfig, url: &str) -> String {
    let base = config.graph_base_url.trim_end_matches('/');
    let path = url.strip_prefix(base).unwrap_or(url);
    format!("/{}", path.trim_start_matches('/'))
}

pub fn encode(config: &BridgeConfig, calls: &[&ApiCall]) -> BridgeResult<TransportRequest> {
    let requests = calls
        .iter()
        .enumerate()
        .map(|(i, call)| {
            let headers = call
                .headers()
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("accept"))
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            SubRequest {
                id: request_id(i),
                method: call.method().to_string(),
                url: relative_url(config, call.url()),
                headers,
                body: call.body(),
            }
        })
        .collect();
    let body = serde_json::to_vec(&BatchRequest { requests })?;

    Ok(TransportRequest::new(Method::POST, config.batch_url(Dialect::Graph))
        .with_header("Accept", "application/json")
        .with_header("Content-Type", "application/json")
        .with_body(body))
}

pub fn decode(response: &TransportResponse) -> BridgeResult<Vec<(String, ResponseEntry)>> {
    let parsed: BatchResponse = serde_json::from_slice(&response.body)
        .map_err(|e| BridgeError::protocol(format!("unreadable Graph batch response: {}", e)))?;

    Ok(parsed
        .responses
        .into_iter()
        .map(|sub| {
            let headers: HashMap<String, String> = sub
                .headers
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect();
            let payload = sub_payload(headers.get("content-type").map(String::as_str), sub.body);
            let mut entry = ResponseEntry::new(0, sub.status, payload);
            entry.headers = headers;
            (sub.id, entry)
        })
        .collect())
}

/// JSON bodies arrive inline; anything else is base64 in a JSON string.
fn sub_payload(content_type: Option<&str>, body: Option<Value>) -> Payload {
    let ct = content_type.unwrap_or_default().to_ascii_lowercase();
    match body {
        None | Some(Value::Null) => Payload::Empty,
        Some(Value::String(s)) if ct.contains("json") => match serde_json::from_str(&s) {
            Ok(v) => Payload::Json(v),
            Err(_) => Payload::Text(s),
        },
        Some(Value::String(s)) if !ct.is_empty() => match BASE64.decode(s.as_bytes()) {
            Ok(bytes) => Payload::from_body(Some(&ct), &bytes),
            Err(_) => Payload::Text(s),
        },
        Some(Value::String(s)) => Payload::Text(s),
        Some(v) => Payload::Json(v),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
