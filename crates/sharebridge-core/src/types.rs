//! Shared types: protocol dialects, configuration, the transport boundary
//! request/response pair, and parsed response entries.

use crate::error::{BridgeError, BridgeResult};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Dialect
// ═══════════════════════════════════════════════════════════════════════

/// The two wire protocols the engine bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Legacy SharePoint REST (`_api/...`, OData verbose, multipart `$batch`).
    Rest,
    /// Microsoft Graph (`/v1.0/...`, JSON `$batch`).
    Graph,
}

impl Dialect {
    /// The other dialect.
    pub fn other(self) -> Self {
        match self {
            Dialect::Rest => Dialect::Graph,
            Dialect::Graph => Dialect::Rest,
        }
    }

    /// `Accept` header value used for calls in this dialect.
    pub fn accept(self) -> &'static str {
        match self {
            Dialect::Rest => "application/json;odata=verbose",
            Dialect::Graph => "application/json",
        }
    }

    /// `Content-Type` for JSON bodies in this dialect.
    pub fn content_type(self) -> &'static str {
        match self {
            Dialect::Rest => "application/json;odata=verbose",
            Dialect::Graph => "application/json",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Rest => write!(f, "SharePoint REST"),
            Dialect::Graph => write!(f, "Microsoft Graph"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Configuration
// ═══════════════════════════════════════════════════════════════════════

/// Configuration for a sharebridge context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Absolute URL of the SharePoint site, e.g. `https://contoso.sharepoint.com/sites/dev`.
    pub site_url: String,
    /// Graph API base URL.  Default: `https://graph.microsoft.com/v1.0`.
    pub graph_base_url: String,
    /// Timeout in seconds for HTTP calls.  Default: 60.
    pub timeout_sec: u64,
    /// Transport-level retries for transient failures.  Default: 0 (off).
    pub max_retries: u32,
    /// Operations per REST `$batch` request.  Default: 100.
    pub max_rest_batch_size: usize,
    /// Operations per Graph `$batch` request.  Default: 20.
    pub max_graph_batch_size: usize,
    /// Dialect tried first when an entity supports both.
    pub preferred_dialect: Dialect,
    /// Language tag used for new taxonomy labels.  Default: `en-US`.
    pub default_language: String,
    /// Extra URL template tokens (`{name}` → value).
    pub tokens: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            graph_base_url: "https://graph.microsoft.com/v1.0".into(),
            timeout_sec: 60,
            max_retries: 0,
            max_rest_batch_size: 100,
            max_graph_batch_size: 20,
            preferred_dialect: Dialect::Graph,
            default_language: "en-US".into(),
            tokens: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Config for a site with defaults for everything else.
    pub fn for_site(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            ..Self::default()
        }
    }

    /// Parse from JSON; missing keys take their default.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that URLs parse and limits are usable.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.site_url.trim().is_empty() {
            return Err(BridgeError::invalid_argument("site_url is required"));
        }
        let site = url::Url::parse(&self.site_url)?;
        if site.scheme() != "https" && site.scheme() != "http" {
            return Err(BridgeError::invalid_argument(format!(
                "site_url must be http(s), got {}",
                site.scheme()
            )));
        }
        url::Url::parse(&self.graph_base_url)?;
        if self.max_rest_batch_size == 0 || self.max_graph_batch_size == 0 {
            return Err(BridgeError::invalid_argument(
                "batch size limits must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn base_url(&self, dialect: Dialect) -> &str {
        match dialect {
            Dialect::Rest => &self.site_url,
            Dialect::Graph => &self.graph_base_url,
        }
    }

    /// Full URL for a dialect-relative path.
    pub fn absolute_url(&self, dialect: Dialect, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url(dialect).trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }

    /// Endpoint that accepts composite requests for a dialect.
    pub fn batch_url(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::Rest => self.absolute_url(dialect, "_api/$batch"),
            Dialect::Graph => self.absolute_url(dialect, "$batch"),
        }
    }

    pub fn max_batch_size(&self, dialect: Dialect) -> usize {
        match dialect {
            Dialect::Rest => self.max_rest_batch_size.max(1),
            Dialect::Graph => self.max_graph_batch_size.max(1),
        }
    }

    /// Template tokens derived from the site URL plus user tokens.
    ///
    /// Built-ins: `hostname` and `serverrelativepath`. User tokens win.
    pub fn context_tokens(&self) -> HashMap<String, String> {
        let mut tokens = HashMap::new();
        if let Ok(site) = url::Url::parse(&self.site_url) {
            if let Some(host) = site.host_str() {
                tokens.insert("hostname".to_string(), host.to_string());
            }
            tokens.insert(
                "serverrelativepath".to_string(),
                site.path().trim_end_matches('/').to_string(),
            );
        }
        for (k, v) in &self.tokens {
            tokens.insert(k.to_lowercase(), v.clone());
        }
        tokens
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Transport boundary
// ═══════════════════════════════════════════════════════════════════════

/// One physical HTTP request handed to a [`crate::transport::Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text (lossy).
    pub fn body_text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// Raw response returned by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are stored lower-case.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Response entries
// ═══════════════════════════════════════════════════════════════════════

/// Parsed body of one sub-response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(serde_json::Value),
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Classify a raw body using its content type.
    pub fn from_body(content_type: Option<&str>, body: &[u8]) -> Self {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Payload::Empty;
        }
        let ct = content_type.unwrap_or_default().to_ascii_lowercase();
        let looks_json = ct.contains("json")
            || (ct.is_empty() && matches!(body.iter().find(|b| !b.is_ascii_whitespace()), Some(b'{') | Some(b'[')));
        if looks_json {
            if let Ok(v) = serde_json::from_slice(body) {
                return Payload::Json(v);
            }
        }
        let textual = ct.is_empty() || ct.starts_with("text/") || ct.contains("xml") || ct.contains("json");
        match std::str::from_utf8(body) {
            Ok(s) if textual => Payload::Text(s.to_string()),
            _ => Payload::Binary(body.to_vec()),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// One sub-result of a physical request, keyed by its position in it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEntry {
    pub position: usize,
    pub status: u16,
    /// Header names are stored lower-case.
    pub headers: HashMap<String, String>,
    pub payload: Payload,
}

impl ResponseEntry {
    pub fn new(position: usize, status: u16, payload: Payload) -> Self {
        Self {
            position,
            status,
            headers: HashMap::new(),
            payload,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        self.payload.as_json()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
