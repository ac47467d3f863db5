//! The transport boundary and its HTTP implementations.
//!
//! The engine only ever calls [`Transport::send`]. [`ReqwestTransport`]
//! injects the bearer token; [`RetryTransport`] adds exponential back-off
//! for 429 / 503 / 504 on top of any transport.

use crate::error::{BridgeError, BridgeErrorKind, BridgeResult};
use crate::types::{BridgeConfig, TransportRequest, TransportResponse};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::collections::HashMap;
use std::time::Duration;

/// Sends one physical HTTP request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> BridgeResult<TransportResponse>;
}

// ═══════════════════════════════════════════════════════════════════════
//  reqwest
// ═══════════════════════════════════════════════════════════════════════

/// HTTP transport over `reqwest` with a caller-supplied bearer token.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    access_token: String,
}

impl ReqwestTransport {
    pub fn new(config: &BridgeConfig, access_token: &str) -> BridgeResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("sharebridge"));

        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .default_headers(headers)
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            inner,
            access_token: access_token.to_string(),
        })
    }

    /// Update the access token (after a refresh).
    pub fn set_access_token(&mut self, token: &str) {
        self.access_token = token.to_string();
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> BridgeResult<TransportResponse> {
        debug!("{} {}", request.method, request.url);
        let mut builder = self
            .inner
            .request(request.method, &request.url)
            .bearer_auth(&self.access_token);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(BridgeError::from)?;
        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(BridgeError::from)?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Retry
// ═══════════════════════════════════════════════════════════════════════

/// Upper bound for computed back-off; `Retry-After` is taken as sent.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Retries transient failures of an inner transport.
#[derive(Debug, Clone)]
pub struct RetryTransport<T> {
    inner: T,
    max_retries: u32,
    base_delay: Duration,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn is_retryable_status(status: u16) -> bool {
        matches!(status, 429 | 503 | 504)
    }

    /// Network failures carry no status.
    fn is_retryable_error(err: &BridgeError) -> bool {
        err.kind == BridgeErrorKind::Transport
            && err.status.map_or(true, Self::is_retryable_status)
    }

    fn delay_for(&self, attempt: u32, response: Option<&TransportResponse>) -> Duration {
        let retry_after = response
            .and_then(|r| r.header("retry-after"))
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        retry_after.unwrap_or_else(|| {
            2u32.checked_pow(attempt.saturating_sub(1))
                .and_then(|factor| self.base_delay.checked_mul(factor))
                .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
        })
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn send(&self, request: TransportRequest) -> BridgeResult<TransportResponse> {
        let mut attempt = 0;
        loop {
            let result = self.inner.send(request.clone()).await;
            if attempt >= self.max_retries {
                return result;
            }
            attempt += 1;
            let delay = match &result {
                Ok(resp) if Self::is_retryable_status(resp.status) => self.delay_for(attempt, Some(resp)),
                Err(e) if Self::is_retryable_error(e) => self.delay_for(attempt, None),
                _ => return result,
            };
            warn!("Retry {}/{} after {:?}", attempt, self.max_retries, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
