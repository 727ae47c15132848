//! Trace context propagation onto outbound remote calls.
//!
//! With the `otel` feature the call span's OpenTelemetry context is written
//! through the global propagator. Without it nothing is written.

use http::HeaderMap;

/// W3C Trace Context header name
pub const TRACEPARENT: &str = "traceparent";

/// Write the trace context of `span` into the outbound `headers`.
///
/// A `traceparent` the caller already set is kept as is.
pub fn propagate(span: &tracing::Span, headers: &mut HeaderMap) {
    if headers.contains_key(TRACEPARENT) {
        return;
    }
    imp::write_context(span, headers);
}

#[cfg(feature = "otel")]
mod imp {
    use http::{HeaderMap, HeaderName, HeaderValue};
    use opentelemetry::global;
    use opentelemetry::propagation::Injector;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    struct OutboundCarrier<'a> {
        headers: &'a mut HeaderMap,
    }

    impl Injector for OutboundCarrier<'_> {
        fn set(&mut self, key: &str, value: String) {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                return;
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                self.headers.insert(name, value);
            }
        }
    }

    pub(super) fn write_context(span: &tracing::Span, headers: &mut HeaderMap) {
        let context = span.context();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&context, &mut OutboundCarrier { headers });
        });
    }
}

#[cfg(not(feature = "otel"))]
mod imp {
    use http::HeaderMap;

    pub(super) fn write_context(_span: &tracing::Span, _headers: &mut HeaderMap) {}
}
