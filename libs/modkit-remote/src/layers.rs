//! Tower layers applied to every outbound request.

use crate::error::RemoteError;
use http::{HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Adds headers every remote call carries:
/// - `User-Agent`, unless the caller set one
/// - W3C trace context of the current span (with the `otel` feature)
#[derive(Clone)]
pub struct OutboundHeadersLayer {
    user_agent: HeaderValue,
}

impl OutboundHeadersLayer {
    /// # Errors
    /// Returns `RemoteError::ConfigPoisoned` if the user agent is not a valid header value
    pub fn try_new(user_agent: &str) -> Result<Self, RemoteError> {
        let user_agent =
            HeaderValue::from_str(user_agent).map_err(|e| RemoteError::poisoned("user_agent", e))?;
        Ok(Self { user_agent })
    }
}

impl<S> Layer<S> for OutboundHeadersLayer {
    type Service = OutboundHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OutboundHeadersService {
            inner,
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Clone)]
pub struct OutboundHeadersService<S> {
    inner: S,
    user_agent: HeaderValue,
}

impl<S, ReqBody> Service<Request<ReqBody>> for OutboundHeadersService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        if !headers.contains_key(http::header::USER_AGENT) {
            headers.insert(http::header::USER_AGENT, self.user_agent.clone());
        }
        crate::otel::propagate(&tracing::Span::current(), headers);
        self.inner.call(req)
    }
}
