#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Resilient remote calls for `ModKit`
//!
//! A [`RemoteClient`] hands out one [`RequestBuilder`] per call. The builder
//! collects route values, query parameters, headers and a payload, then
//! `exec()` performs exactly one HTTP exchange and decodes the JSON answer.
//!
//! - Path templates with `{placeholder}` segments and ordered multi-valued
//!   query parameters
//! - JSON (`serde`) or protobuf (`prost`) request payloads, encoded at
//!   execution time
//! - Deferred configuration errors: the first invalid setter poisons the
//!   builder and `exec()` returns that error without I/O
//! - Optional tracing span and circuit breaker per call, both keyed by the
//!   same resilience identity (`service:path_template`)
//! - Cooperative cancellation and deadlines via [`CallContext`]
//! - A diagnostics bag published once per call through a [`DiagnosticsSink`]
//! - rustls TLS (HTTPS only by default), connection pooling and transparent
//!   response decompression
//!
//! No retries are made and redirects are not followed; any status outside
//! `[200, 300)` is a [`RemoteError::BadStatus`].
//!
//! # Example
//!
//! ```ignore
//! use modkit_remote::{CallContext, RemoteClient, RemoteService, StaticService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let users: Arc<dyn RemoteService> = Arc::new(StaticService::new("users", "users.svc:8443"));
//! let client = RemoteClient::builder().default_circuit_breaker(true).build()?;
//!
//! let orders: Vec<Order> = client
//!     .get(users, "/users/{id}/orders")
//!     .route("id", user_id)
//!     .query_values("status", ["open", "shipped"])
//!     .context(CallContext::new().with_timeout(Duration::from_secs(2)))
//!     .exec()
//!     .await?;
//! ```

pub mod breaker;
mod builder;
mod client;
mod config;
mod context;
pub mod diagnostics;
mod error;
mod layers;
pub mod otel;
mod payload;
mod query;
mod request;
mod response;
mod route;
mod service;
mod tls;
pub mod tracer;

pub use breaker::{
    Admission, CircuitBreaker, CircuitState, Outcome, Rejected, RollingCircuitBreaker,
};
pub use builder::RemoteClientBuilder;
pub use client::RemoteClient;
pub use config::{
    CircuitBreakerConfig, DEFAULT_USER_AGENT, RemoteClientConfig, TlsRootConfig,
    TransportSecurity,
};
pub use context::CallContext;
pub use diagnostics::{Diagnostics, DiagnosticsSink, TracingDiagnosticsSink};
pub use error::{CancelReason, PayloadFormat, RemoteError};
pub use layers::{OutboundHeadersLayer, OutboundHeadersService};
pub use payload::{BinaryPayload, JsonPayload, Payload};
pub use query::{QueryParams, Scheme, build_url};
pub use request::RequestBuilder;
pub use response::{ResponseBody, is_success_status};
pub use route::resolve_path;
pub use service::{RemoteService, StaticService};
pub use tracer::{ActiveSpan, SpanOutcome, Tracer, TracingTracer, resilience_identity};
