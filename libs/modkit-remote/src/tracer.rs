//! Span lifecycle around a remote call.

use crate::context::CallContext;
use crate::error::RemoteError;
use http::StatusCode;
use tracing::field::Empty;

/// Key shared by the circuit breaker and the call span.
///
/// Both sides must derive it through this function so traces and breaker
/// state correlate.
#[must_use]
pub fn resilience_identity(service: &str, path_template: &str) -> String {
    format!("{service}:{path_template}")
}

/// How a traced call ended.
#[derive(Debug, Clone, Copy)]
pub enum SpanOutcome<'a> {
    /// The server answered with an accepted status
    Success(StatusCode),
    /// The call returned an error
    Failure(&'a RemoteError),
    /// The call future was dropped before it finished
    Abandoned,
}

/// A started span; finalized by [`ActiveSpan::finish`].
pub trait ActiveSpan: Send {
    fn finish(self: Box<Self>, outcome: SpanOutcome<'_>);
}

/// Starts call spans.
///
/// Must work when the context carries no upstream trace.
pub trait Tracer: Send + Sync {
    /// Start a span named `name` under `ctx`.
    ///
    /// Returns a context carrying the new span, used for the rest of the call.
    fn start_span(&self, ctx: &CallContext, name: &str) -> (CallContext, Box<dyn ActiveSpan>);
}

/// Default tracer backed by `tracing` spans.
///
/// With the `otel` feature and a `tracing-opentelemetry` layer installed the
/// span is exported as an OpenTelemetry client span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn start_span(&self, ctx: &CallContext, name: &str) -> (CallContext, Box<dyn ActiveSpan>) {
        let span = tracing::info_span!(
            parent: ctx.span(),
            "remote_call",
            otel.name = %name,
            otel.kind = "client",
            http.status_code = Empty,
            error = Empty,
        );
        let child = ctx.clone().with_span(span.clone());
        (child, Box::new(TracingSpan { span }))
    }
}

struct TracingSpan {
    span: tracing::Span,
}

impl ActiveSpan for TracingSpan {
    fn finish(self: Box<Self>, outcome: SpanOutcome<'_>) {
        match outcome {
            SpanOutcome::Success(status) => {
                self.span.record("http.status_code", status.as_u16());
            }
            SpanOutcome::Failure(err) => {
                if let Some(status) = err.status() {
                    self.span.record("http.status_code", status.as_u16());
                }
                self.span.record("error", tracing::field::display(err));
            }
            SpanOutcome::Abandoned => {
                self.span.record("error", "abandoned");
            }
        }
    }
}

/// Finalizes a span exactly once: explicitly, or as abandoned on drop.
pub(crate) struct SpanGuard {
    span: Option<Box<dyn ActiveSpan>>,
}

impl SpanGuard {
    pub(crate) fn new(span: Box<dyn ActiveSpan>) -> Self {
        Self { span: Some(span) }
    }

    pub(crate) fn finish(mut self, outcome: SpanOutcome<'_>) {
        if let Some(span) = self.span.take() {
            span.finish(outcome);
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            span.finish(SpanOutcome::Abandoned);
        }
    }
}
