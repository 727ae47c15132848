use http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Wire format of an outbound request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `serde_json` encoding of any `Serialize` value
    Json,
    /// Protobuf encoding of a `prost::Message`
    Binary,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

/// Why an in-flight call was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired
    Cancelled,
    /// The caller's deadline passed
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled by caller"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Remote call error types
///
/// Configuration errors are captured by the [`RequestBuilder`](crate::RequestBuilder)
/// and returned verbatim by `exec()`. Everything else is produced while the
/// call executes. Nothing is retried internally.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RemoteError {
    /// A configuration step failed; the builder ignored every later step
    #[error("invalid call configuration in {step}: {reason}")]
    ConfigPoisoned {
        /// Builder method that failed
        step: &'static str,
        /// What was wrong with its input
        reason: String,
    },

    /// Path template has a placeholder with no route value
    #[error("missing route parameter '{param}'")]
    MissingRouteParam { param: String },

    /// Scheme, host, path and query do not form a valid URL
    #[error("cannot construct URL '{url}': {reason}")]
    UrlConstruction { url: String, reason: String },

    /// Payload could not be encoded
    #[error("failed to encode {format} payload: {source}")]
    Encode {
        format: PayloadFormat,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Service discovery has no address for the target service
    #[error("no available remote for service '{service}'")]
    NoAvailableRemote { service: String },

    /// Transport error (network, connection, etc)
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded the configured size limit
    #[error("response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Response status outside `[200, 300)`
    #[error("HTTP {status}: {body_preview}")]
    BadStatus {
        status: StatusCode,
        body_preview: String,
    },

    /// Response body did not decode into the requested type
    #[error("failed to decode response (HTTP {status}): {source}")]
    Decode {
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },

    /// The circuit breaker rejected the call without dispatching it
    #[error("circuit '{circuit}' is open")]
    CircuitOpen { circuit: String },

    /// The caller's context ended the call
    #[error("call aborted: {reason}")]
    Cancelled { reason: CancelReason },
}

impl RemoteError {
    pub(crate) fn poisoned(step: &'static str, reason: impl fmt::Display) -> Self {
        Self::ConfigPoisoned {
            step,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(
        format: PayloadFormat,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Encode {
            format,
            source: Box::new(source),
        }
    }

    /// HTTP status of the response, when the server answered.
    ///
    /// `None` means the call failed before a response arrived.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::BadStatus { status, .. } | Self::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if the circuit breaker short-circuited the call.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns `true` if the caller's context aborted the call.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether the breaker should record this error as a remote failure.
    ///
    /// Errors raised before anything reached the remote (local resolution,
    /// encoding, cancellation) say nothing about its health.
    #[must_use]
    pub fn counts_against_circuit(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::BodyTooLarge { .. }
                | Self::BadStatus { .. }
                | Self::Decode { .. }
        )
    }

    /// Stable snake-case name of the error kind, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigPoisoned { .. } => "config_poisoned",
            Self::MissingRouteParam { .. } => "missing_route_param",
            Self::UrlConstruction { .. } => "url_construction",
            Self::Encode { .. } => "encode",
            Self::NoAvailableRemote { .. } => "no_available_remote",
            Self::Transport(_) => "transport",
            Self::Tls(_) => "tls",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::BadStatus { .. } => "bad_status",
            Self::Decode { .. } => "decode",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

impl From<hyper::Error> for RemoteError {
    fn from(err: hyper::Error) -> Self {
        RemoteError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for RemoteError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        RemoteError::Transport(Box::new(err))
    }
}
