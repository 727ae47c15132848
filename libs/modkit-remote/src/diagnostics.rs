//! Per-call diagnostics bag and the sink it is handed to.

use crate::error::RemoteError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Maximum number of response body bytes captured into diagnostics.
pub const DIAGNOSTIC_BODY_LIMIT: usize = 4096;

/// Well-known diagnostics keys.
pub mod keys {
    pub const SERVICE: &str = "service";
    pub const IDENTITY: &str = "identity";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const URL: &str = "url";
    pub const CONFIG_ERROR: &str = "config_error";
    pub const MISSING_ROUTE_PARAM: &str = "missing_route_param";
    pub const BAD_URL: &str = "bad_url";
    pub const STATUS: &str = "status";
    pub const RESPONSE_LENGTH: &str = "response_length";
    pub const RESPONSE_BODY: &str = "response_body";
    pub const RESPONSE_TRUNCATED: &str = "response_truncated";
    pub const ERROR: &str = "error";
    pub const ERROR_KIND: &str = "error_kind";
    pub const CIRCUIT_OPEN: &str = "circuit_open";
    pub const CANCELLED: &str = "cancelled";
}

/// Ordered string-keyed facts about one remote call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(BTreeMap<String, Value>);

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_owned(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Capture at most [`DIAGNOSTIC_BODY_LIMIT`] bytes of a response body.
    pub fn capture_body(&mut self, body: &[u8]) {
        self.capture_preview(body, false);
    }

    /// Capture a body prefix that was read on its own.
    ///
    /// `more` tells that the body went on past `head`, so the capture is
    /// marked truncated even when `head` fits the limit.
    pub fn capture_preview(&mut self, head: &[u8], more: bool) {
        let truncated = more || head.len() > DIAGNOSTIC_BODY_LIMIT;
        self.insert(keys::RESPONSE_BODY, bounded_text(head, DIAGNOSTIC_BODY_LIMIT));
        self.insert(keys::RESPONSE_TRUNCATED, truncated);
    }

    /// Record the facts an error carries.
    pub fn record_error(&mut self, err: &RemoteError) {
        match err {
            RemoteError::ConfigPoisoned { reason, .. } => {
                self.insert(keys::CONFIG_ERROR, reason.as_str());
            }
            RemoteError::MissingRouteParam { param } => {
                self.insert(keys::MISSING_ROUTE_PARAM, param.as_str());
            }
            RemoteError::UrlConstruction { url, .. } => {
                self.insert(keys::BAD_URL, url.as_str());
            }
            RemoteError::BadStatus { status, .. } | RemoteError::Decode { status, .. } => {
                self.insert(keys::STATUS, status.as_u16());
            }
            RemoteError::CircuitOpen { .. } => self.insert(keys::CIRCUIT_OPEN, true),
            RemoteError::Cancelled { reason } => self.insert(keys::CANCELLED, reason.to_string()),
            _ => {}
        }
        self.insert(keys::ERROR_KIND, err.kind());
        self.insert(keys::ERROR, err.to_string());
    }
}

/// Lossy UTF-8 text of at most `limit` bytes taken from the start of `bytes`.
///
/// A character cut at the limit is dropped instead of being replaced, and
/// replacement characters never push the text past `limit`.
#[must_use]
pub fn bounded_text(bytes: &[u8], limit: usize) -> String {
    let mut head = &bytes[..bytes.len().min(limit)];
    if let Err(err) = std::str::from_utf8(head)
        && err.error_len().is_none()
    {
        head = &head[..err.valid_up_to()];
    }

    let mut text = String::from_utf8_lossy(head).into_owned();
    if text.len() > limit {
        let cut = (0..=limit)
            .rev()
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(0);
        text.truncate(cut);
    }
    text
}

/// Receives the diagnostics bag once per executed call.
pub trait DiagnosticsSink: Send + Sync {
    fn publish(&self, diagnostics: &Diagnostics, error: Option<&RemoteError>);
}

/// Logs the bag as a JSON field through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnosticsSink;

impl DiagnosticsSink for TracingDiagnosticsSink {
    fn publish(&self, diagnostics: &Diagnostics, error: Option<&RemoteError>) {
        let rendered = serde_json::to_string(diagnostics).unwrap_or_default();
        match error {
            None => tracing::debug!(
                target: "modkit_remote::diagnostics",
                diagnostics = %rendered,
                "remote call succeeded"
            ),
            Some(err) => tracing::warn!(
                target: "modkit_remote::diagnostics",
                diagnostics = %rendered,
                error = %err,
                "remote call failed"
            ),
        }
    }
}
