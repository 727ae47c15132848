use crate::breaker;
use crate::client::ClientShared;
use crate::config::TransportSecurity;
use crate::context::CallContext;
use crate::diagnostics::{Diagnostics, keys};
use crate::error::{PayloadFormat, RemoteError};
use crate::payload::Payload;
use crate::query::{self, QueryParams, Scheme};
use crate::response;
use crate::route;
use crate::service::RemoteService;
use crate::tracer::{SpanGuard, SpanOutcome, resilience_identity};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::Instrument;

/// What the call sends, accumulated by the builder.
struct Call {
    service: Arc<dyn RemoteService>,
    method: Method,
    scheme: Scheme,
    path_template: String,
    routes: BTreeMap<String, String>,
    query: QueryParams,
    headers: HeaderMap,
    payload: Payload,
}

/// Single-call request builder with a fluent API
///
/// Created by [`RemoteClient::request`](crate::RemoteClient::request) and its
/// verb shorthands. Configuration is pure data assembly; nothing touches the
/// network until [`exec()`](RequestBuilder::exec).
///
/// # Errors are deferred
///
/// A setter that receives invalid input records a `ConfigPoisoned` error and
/// every later setter becomes a no-op. `exec()` then returns that first error
/// without any I/O.
///
/// # Example
///
/// ```ignore
/// let order: Order = client
///     .post(orders, "/customers/{cid}/orders")
///     .route("cid", customer_id)
///     .query("dry_run", "false")
///     .header("x-request-id", &request_id)
///     .json(NewOrder { sku, qty })
///     .context(CallContext::new().with_timeout(Duration::from_secs(2)))
///     .circuit_breaker(true)
///     .exec()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .exec() is called"]
pub struct RequestBuilder {
    shared: Arc<ClientShared>,
    call: Call,
    context: CallContext,
    tracing: bool,
    circuit_breaker: bool,
    /// First configuration error; turns every later setter into a no-op
    error: Option<RemoteError>,
    diagnostics: Diagnostics,
}

impl RequestBuilder {
    pub(crate) fn new(
        shared: Arc<ClientShared>,
        service: Arc<dyn RemoteService>,
        method: Method,
        path_template: String,
    ) -> Self {
        let scheme = match shared.transport {
            TransportSecurity::TlsOnly => Scheme::Https,
            TransportSecurity::AllowInsecureHttp => Scheme::Http,
        };

        let mut diagnostics = Diagnostics::new();
        diagnostics.insert(keys::SERVICE, service.name());
        diagnostics.insert(
            keys::IDENTITY,
            resilience_identity(service.name(), &path_template),
        );
        diagnostics.insert(keys::METHOD, method.as_str());
        diagnostics.insert(keys::PATH, path_template.as_str());

        Self {
            tracing: shared.tracing,
            circuit_breaker: shared.circuit_breaker,
            shared,
            call: Call {
                service,
                method,
                scheme,
                path_template,
                routes: BTreeMap::new(),
                query: QueryParams::new(),
                headers: HeaderMap::new(),
                payload: Payload::None,
            },
            context: CallContext::new(),
            error: None,
            diagnostics,
        }
    }

    fn poison(&mut self, step: &'static str, reason: impl std::fmt::Display) {
        let err = RemoteError::poisoned(step, reason);
        tracing::debug!(step, error = %err, "remote call configuration rejected");
        if let RemoteError::ConfigPoisoned { reason, .. } = &err {
            self.diagnostics.insert(keys::CONFIG_ERROR, reason.as_str());
        }
        self.error = Some(err);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.call.headers.insert(name, value);
            }
            (Err(e), _) => self.poison("header", format!("invalid header name '{name}': {e}")),
            (_, Err(e)) => self.poison("header", format!("invalid value for header '{name}': {e}")),
        }
    }

    /// Set a header, replacing any earlier value for the same name
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_none() {
            self.set_header(name, value);
        }
        self
    }

    /// Set several headers in order; later entries win on duplicate names
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            if self.error.is_some() {
                break;
            }
            self.set_header(name.as_ref(), value.as_ref());
        }
        self
    }

    fn checked_query_name(&mut self, name: &str) -> bool {
        if name.is_empty() {
            self.poison("query", "query parameter name must not be empty");
            return false;
        }
        true
    }

    /// Append one value to a query parameter
    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        if self.error.is_none() && self.checked_query_name(name) {
            self.call.query.append(name, value);
        }
        self
    }

    /// Append several values to a query parameter, keeping their order
    pub fn query_values<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        if self.error.is_none() && self.checked_query_name(name) {
            self.call.query.extend(name, values);
        }
        self
    }

    /// Replace the values of each named parameter.
    ///
    /// A replaced parameter keeps its position in the query string.
    pub fn set_queries<I, K, VS, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, VS)>,
        K: AsRef<str>,
        VS: IntoIterator<Item = V>,
        V: Into<String>,
    {
        for (name, values) in params {
            if self.error.is_some() || !self.checked_query_name(name.as_ref()) {
                break;
            }
            self.call.query.replace(name.as_ref(), values);
        }
        self
    }

    fn set_route(&mut self, placeholder: String, value: String) {
        match route::validate_placeholder(&placeholder) {
            Ok(()) => {
                self.call.routes.insert(placeholder, value);
            }
            Err(reason) => self.poison("route", reason),
        }
    }

    /// Fill the `{placeholder}` segment of the path template
    pub fn route(mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.set_route(placeholder.into(), value.into());
        }
        self
    }

    /// Fill several placeholders; later entries win on duplicates
    pub fn routes<I, K, V>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (placeholder, value) in routes {
            if self.error.is_some() {
                break;
            }
            self.set_route(placeholder.into(), value.into());
        }
        self
    }

    /// Choose `https` (`true`) or `http` (`false`).
    ///
    /// Plain HTTP poisons the builder unless the client was built with
    /// `TransportSecurity::AllowInsecureHttp`.
    pub fn use_tls(mut self, tls: bool) -> Self {
        if self.error.is_some() {
            return self;
        }
        if tls {
            self.call.scheme = Scheme::Https;
        } else if self.shared.transport == TransportSecurity::TlsOnly {
            self.poison(
                "use_tls",
                "plain HTTP requested but transport security is tls_only",
            );
        } else {
            self.call.scheme = Scheme::Http;
        }
        self
    }

    /// Send `value` as JSON, replacing any earlier payload.
    ///
    /// Encoding happens in `exec()`; a failure there is `RemoteError::Encode`.
    pub fn json<T: Serialize + Send + 'static>(mut self, value: T) -> Self {
        if self.error.is_none() {
            self.call.payload = Payload::json(value);
        }
        self
    }

    /// Send `message` protobuf-encoded, replacing any earlier payload.
    ///
    /// The response is still decoded as JSON by `exec()`. Set a
    /// `content-type` header if the remote expects something other than the
    /// default `application/json`.
    pub fn binary<M: prost::Message + 'static>(mut self, message: M) -> Self {
        if self.error.is_none() {
            self.call.payload = Payload::binary(message);
        }
        self
    }

    /// Cancellation, deadline and parent span for the call
    pub fn context(mut self, context: CallContext) -> Self {
        if self.error.is_none() {
            self.context = context;
        }
        self
    }

    /// Open a span around the call (client default applies otherwise)
    pub fn tracing(mut self, enabled: bool) -> Self {
        if self.error.is_none() {
            self.tracing = enabled;
        }
        self
    }

    /// Run the call under the circuit breaker (client default applies otherwise)
    pub fn circuit_breaker(mut self, enabled: bool) -> Self {
        if self.error.is_none() {
            self.circuit_breaker = enabled;
        }
        self
    }

    /// The configuration error that poisoned this builder, if any
    #[must_use]
    pub fn error(&self) -> Option<&RemoteError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.error.is_some()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    #[must_use]
    pub fn route_values(&self) -> &BTreeMap<String, String> {
        &self.call.routes
    }

    #[must_use]
    pub fn query_params(&self) -> &QueryParams {
        &self.call.query
    }

    #[must_use]
    pub fn header_map(&self) -> &HeaderMap {
        &self.call.headers
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.call.scheme
    }

    #[must_use]
    pub fn payload_format(&self) -> Option<PayloadFormat> {
        self.call.payload.format()
    }

    /// Resilience identity of the call: `service:path_template`
    #[must_use]
    pub fn identity(&self) -> String {
        resilience_identity(self.call.service.name(), &self.call.path_template)
    }

    /// Execute the call and decode the JSON response into `T`.
    ///
    /// Makes exactly one network attempt. Diagnostics are handed to the
    /// client's sink once, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `ConfigPoisoned` from an earlier setter, without I/O
    /// - `NoAvailableRemote`, `MissingRouteParam`, `UrlConstruction`,
    ///   `Encode` before dispatch
    /// - `CircuitOpen` if the breaker rejected the call, without I/O
    /// - `Transport`, `BodyTooLarge`, `BadStatus`, `Decode` from the exchange
    /// - `Cancelled` if the call context ended first
    pub async fn exec<T: DeserializeOwned>(self) -> Result<T, RemoteError> {
        self.execute(|status, body, diag| response::decode_json(status, &body, diag))
            .await
    }

    /// Execute the call and only validate the status; the body is discarded.
    ///
    /// # Errors
    ///
    /// Same as [`exec()`](Self::exec) except `Decode`.
    pub async fn exec_no_content(self) -> Result<StatusCode, RemoteError> {
        self.execute(|status, _, _| Ok(status)).await
    }

    async fn execute<T, D>(self, decode: D) -> Result<T, RemoteError>
    where
        D: FnOnce(StatusCode, Bytes, &mut Diagnostics) -> Result<T, RemoteError>,
    {
        let Self {
            shared,
            call,
            context,
            tracing,
            circuit_breaker,
            error,
            mut diagnostics,
        } = self;

        if let Some(err) = error {
            diagnostics.record_error(&err);
            shared.sink.publish(&diagnostics, Some(&err));
            return Err(err);
        }

        let identity = resilience_identity(call.service.name(), &call.path_template);

        let (ctx, span) = if tracing {
            let (ctx, span) = shared.tracer.start_span(&context, &identity);
            (ctx, Some(SpanGuard::new(span)))
        } else {
            (context, None)
        };

        let unit = attempt(&shared, call, &ctx, &mut diagnostics, decode)
            .instrument(ctx.span().clone());
        let result = if circuit_breaker {
            breaker::guarded(shared.breaker.as_ref(), &identity, unit).await
        } else {
            unit.await
        };

        if let Err(err) = &result {
            diagnostics.record_error(err);
        }
        if let Some(span) = span {
            span.finish(match &result {
                Ok((status, _)) => SpanOutcome::Success(*status),
                Err(err) => SpanOutcome::Failure(err),
            });
        }
        shared.sink.publish(&diagnostics, result.as_ref().err());

        result.map(|(_, value)| value)
    }
}

/// Resolve, encode, dispatch and decode one call.
async fn attempt<T, D>(
    shared: &ClientShared,
    call: Call,
    ctx: &CallContext,
    diag: &mut Diagnostics,
    decode: D,
) -> Result<(StatusCode, T), RemoteError>
where
    D: FnOnce(StatusCode, Bytes, &mut Diagnostics) -> Result<T, RemoteError>,
{
    let Some(host) = call.service.address() else {
        return Err(RemoteError::NoAvailableRemote {
            service: call.service.name().to_owned(),
        });
    };

    let path = route::resolve_path(&call.path_template, &call.routes)?;
    let url = query::build_url(call.scheme, &host, &path, &call.query)?;
    diag.insert(keys::URL, url.as_str());

    let body = call.payload.encode()?;
    let request = build_request(call.method, &url, call.headers, body)?;

    tracing::trace!(url = %url, "dispatching remote call");
    let (status, bytes) = ctx
        .run(async {
            let response = shared.dispatcher.clone().oneshot(request).await?;
            response::checked_body(response, shared.max_body_size, diag).await
        })
        .await?;

    let value = decode(status, bytes, diag)?;
    Ok((status, value))
}

fn build_request(
    method: Method,
    url: &url::Url,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Request<Full<Bytes>>, RemoteError> {
    let mut request = Request::builder()
        .method(method)
        .uri(url.as_str())
        .body(Full::new(body))
        .map_err(|e| RemoteError::UrlConstruction {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    *request.headers_mut() = headers;
    if !request.headers().contains_key(CONTENT_TYPE) {
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }
    Ok(request)
}
