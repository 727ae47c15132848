use crate::breaker::{CircuitBreaker, RollingCircuitBreaker};
use crate::client::{ClientShared, Dispatcher, RemoteClient};
use crate::config::{RemoteClientConfig, TlsRootConfig, TransportSecurity};
use crate::diagnostics::{DiagnosticsSink, TracingDiagnosticsSink};
use crate::error::RemoteError;
use crate::layers::OutboundHeadersLayer;
use crate::response::ResponseBody;
use crate::tls;
use crate::tracer::{Tracer, TracingTracer};
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Builder for a [`RemoteClient`].
///
/// Collaborators default to [`TracingTracer`], [`TracingDiagnosticsSink`] and
/// the process-wide [`RollingCircuitBreaker::global()`] (or a dedicated
/// breaker when the config carries a `breaker` section).
pub struct RemoteClientBuilder {
    config: RemoteClientConfig,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    tracer: Option<Arc<dyn Tracer>>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl RemoteClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RemoteClientConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RemoteClientConfig) -> Self {
        Self {
            config,
            breaker: None,
            tracer: None,
            sink: None,
        }
    }

    /// Set the User-Agent sent when a call does not set its own
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set maximum response body size in bytes
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set transport security mode
    ///
    /// Use `TransportSecurity::AllowInsecureHttp` only for in-cluster traffic
    /// or tests against mock servers.
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow insecure HTTP connections (for testing only)
    ///
    /// Equivalent to `.transport(TransportSecurity::AllowInsecureHttp)`.
    /// Calls then default to `http://` and may opt into TLS with
    /// `use_tls(true)`.
    ///
    /// # Compile-time Safety
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "modkit_remote::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Set the TCP connect timeout (`None` leaves it to the OS)
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout_ms =
            timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Whether new calls open a span unless they say otherwise
    #[must_use]
    pub fn default_tracing(mut self, enabled: bool) -> Self {
        self.config.tracing = enabled;
        self
    }

    /// Whether new calls run under the breaker unless they say otherwise
    #[must_use]
    pub fn default_circuit_breaker(mut self, enabled: bool) -> Self {
        self.config.circuit_breaker = enabled;
        self
    }

    /// Use a specific circuit breaker instead of the configured one
    #[must_use]
    pub fn circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    #[must_use]
    pub fn diagnostics_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Tls` if the TLS roots cannot be loaded, or
    /// `RemoteError::ConfigPoisoned` for an invalid User-Agent.
    pub fn build(self) -> Result<RemoteClient, RemoteError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 calls default to plain http://"
            );
        }

        let dispatcher = build_dispatcher(&self.config)?;

        let breaker = match (self.breaker, &self.config.breaker) {
            (Some(breaker), _) => breaker,
            (None, Some(config)) => Arc::new(RollingCircuitBreaker::new(config.clone())),
            (None, None) => RollingCircuitBreaker::global(),
        };

        Ok(RemoteClient::from_shared(ClientShared {
            dispatcher,
            breaker,
            tracer: self.tracer.unwrap_or_else(|| Arc::new(TracingTracer)),
            sink: self
                .sink
                .unwrap_or_else(|| Arc::new(TracingDiagnosticsSink)),
            max_body_size: self.config.max_body_size,
            transport: self.config.transport,
            tracing: self.config.tracing,
            circuit_breaker: self.config.circuit_breaker,
        }))
    }
}

impl Default for RemoteClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pooled hyper client behind the outbound headers and decompression layers.
///
/// Request flow (outer to inner):
///   `OutboundHeaders` -> Decompression -> `hyper_client`
///
/// Redirects are not followed and nothing is retried: the caller sees the
/// first response with whatever status it has.
fn build_dispatcher(config: &RemoteClientConfig) -> Result<Dispatcher, RemoteError> {
    let mut tcp = HttpConnector::new();
    tcp.enforce_http(false);
    tcp.set_connect_timeout(config.connect_timeout());
    let https = tls::https_connector(config.tls_roots, config.transport, tcp)?;

    let mut client_builder = Client::builder(TokioExecutor::new());
    // pool_timer is required for pool_idle_timeout to take effect
    client_builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .http2_only(false);
    if let Some(idle_timeout) = config.pool_idle_timeout() {
        client_builder.pool_idle_timeout(idle_timeout);
    }
    let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

    let headers = OutboundHeadersLayer::try_new(&config.user_agent)?;

    let service = ServiceBuilder::new()
        .layer(headers)
        .layer(DecompressionLayer::new())
        .service(hyper_client)
        .map_response(map_decompression_response)
        .map_err(RemoteError::from);

    Ok(BoxCloneSyncService::new(service))
}

/// Box the (possibly decompressed) body into [`ResponseBody`].
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed)
}
