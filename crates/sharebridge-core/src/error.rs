//! Error types for the sharebridge engine.
//!
//! Every public surface returns `BridgeResult<T>`. The error carries enough
//! structure (kind, provider status, provider code) for callers to branch on
//! "not found" versus "conflict" without string matching.

use crate::types::{Dialect, Payload, ResponseEntry};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convenience alias.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error kinds surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeErrorKind {
    /// A URL placeholder could not be filled from the entity, its ancestors
    /// or the context tokens.
    MissingContext,
    /// No metadata / endpoint template is registered for the requested use.
    NotRegistered,
    /// Invalid argument to an operation, detected before any I/O.
    InvalidArgument,
    /// A field was read before it was loaded.
    NotLoaded,
    /// Network / connection failure, or a failed physical request.
    Transport,
    /// The provider rejected one specific operation.
    Service,
    /// Response and request could not be paired safely.
    ProtocolIntegrity,
    /// The batch was already executed.
    BatchAlreadyExecuted,
    /// The call was canceled before it completed.
    Canceled,
    /// (De)serialization error.
    Serialization,
    /// Catch-all internal error.
    Internal,
}

impl fmt::Display for BridgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Structured error returned by every public function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub message: String,
    /// HTTP status reported by the provider, when there was one.
    pub status: Option<u16>,
    /// Provider error code (`itemNotFound`, `-2130575257, Microsoft.SharePoint.SPException`, ...).
    pub provider_code: Option<String>,
    pub request_id: Option<String>,
    pub dialect: Option<Dialect>,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        if let Some(ref code) = self.provider_code {
            write!(f, " (provider: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for BridgeError {}

impl BridgeError {
    /// Create from a kind + message.
    pub fn new(kind: BridgeErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            status: None,
            provider_code: None,
            request_id: None,
            dialect: None,
        }
    }

    pub fn missing_context(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::MissingContext, msg)
    }

    pub fn not_registered(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::NotRegistered, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::InvalidArgument, msg)
    }

    pub fn not_loaded(type_name: &str, field: &str) -> Self {
        Self::new(
            BridgeErrorKind::NotLoaded,
            format!("field {}.{} is not loaded", type_name, field),
        )
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Transport, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::ProtocolIntegrity, msg)
    }

    pub fn already_executed(batch_id: &str) -> Self {
        Self::new(
            BridgeErrorKind::BatchAlreadyExecuted,
            format!("batch {} was already executed", batch_id),
        )
    }

    pub fn canceled(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Canceled, msg)
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Serialization, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Internal, msg)
    }

    /// Attach the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the dialect the failing request was sent in.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == Some(409)
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self.status, Some(429) | Some(503))
    }

    pub fn is_canceled(&self) -> bool {
        self.kind == BridgeErrorKind::Canceled
    }

    /// Build a `Service` error from a non-success sub-response.
    ///
    /// Understands the SharePoint verbose (`{"error":{"message":{"value":..}}}`),
    /// nometadata (`{"odata.error":{..}}`) and Graph
    /// (`{"error":{"code":..,"message":..,"innerError":{"request-id":..}}}`) shapes.
    pub fn from_service_response(dialect: Dialect, entry: &ResponseEntry) -> Self {
        let (code, message, body_request_id) = match &entry.payload {
            Payload::Json(v) => Self::parse_error_body(v),
            Payload::Text(t) => match serde_json::from_str::<serde_json::Value>(t) {
                Ok(v) => Self::parse_error_body(&v),
                Err(_) => (None, None, None),
            },
            _ => (None, None, None),
        };

        let request_id = body_request_id.or_else(|| {
            entry
                .header("request-id")
                .or_else(|| entry.header("sprequestguid"))
                .map(String::from)
        });

        let message = message.unwrap_or_else(|| {
            format!("{} call failed (HTTP {})", dialect, entry.status)
        });

        Self {
            kind: BridgeErrorKind::Service,
            message,
            status: Some(entry.status),
            provider_code: code,
            request_id,
            dialect: Some(dialect),
        }
    }

    fn parse_error_body(v: &serde_json::Value) -> (Option<String>, Option<String>, Option<String>) {
        let err = if v.get("error").is_some() {
            &v["error"]
        } else {
            &v["odata.error"]
        };
        let code = err["code"].as_str().map(String::from);
        let msg = err["message"]
            .as_str()
            .or_else(|| err["message"]["value"].as_str())
            .map(String::from);
        let req_id = err["innerError"]["request-id"]
            .as_str()
            .or_else(|| err["innererror"]["request-id"].as_str())
            .map(String::from);
        (code, msg, req_id)
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        let base = if err.is_timeout() {
            Self::transport(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            Self::transport(format!("Connection failed: {}", err))
        } else {
            Self::transport(format!("HTTP error: {}", err))
        };
        match err.status() {
            Some(status) => base.with_status(status.as_u16()),
            None => base,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(err: url::ParseError) -> Self {
        Self::invalid_argument(format!("URL parse error: {}", err))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
