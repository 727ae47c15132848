//! End-to-end behavior of `RequestBuilder::exec` against a mock remote.
//!
//! Wires up: mock server -> `StaticService` -> `RemoteClient` with a recording
//! diagnostics sink and a counting tracer -> asserts on the result, the
//! mock's call count, the published diagnostics and the span lifecycle.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::StatusCode;
use httpmock::prelude::*;
use modkit_remote::diagnostics::keys;
use modkit_remote::{
    ActiveSpan, CallContext, CancelReason, CircuitBreakerConfig, CircuitState, Diagnostics,
    DiagnosticsSink, RemoteClient, RemoteError, RemoteService, RollingCircuitBreaker, SpanOutcome,
    StaticService, Tracer,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(Diagnostics, Option<String>)>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<(Diagnostics, Option<String>)> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }

    fn single(&self) -> Diagnostics {
        let mut published = self.take();
        assert_eq!(published.len(), 1, "diagnostics must be published exactly once");
        published.remove(0).0
    }
}

impl DiagnosticsSink for RecordingSink {
    fn publish(&self, diagnostics: &Diagnostics, error: Option<&RemoteError>) {
        self.published
            .lock()
            .unwrap()
            .push((diagnostics.clone(), error.map(ToString::to_string)));
    }
}

#[derive(Default)]
struct CountingTracer {
    started: Mutex<Vec<String>>,
    finished: Arc<Mutex<Vec<String>>>,
}

struct CountingSpan {
    finished: Arc<Mutex<Vec<String>>>,
}

impl ActiveSpan for CountingSpan {
    fn finish(self: Box<Self>, outcome: SpanOutcome<'_>) {
        let label = match outcome {
            SpanOutcome::Success(status) => format!("ok:{}", status.as_u16()),
            SpanOutcome::Failure(err) => format!("err:{}", err.kind()),
            SpanOutcome::Abandoned => "abandoned".to_owned(),
        };
        self.finished.lock().unwrap().push(label);
    }
}

impl Tracer for CountingTracer {
    fn start_span(&self, ctx: &CallContext, name: &str) -> (CallContext, Box<dyn ActiveSpan>) {
        self.started.lock().unwrap().push(name.to_owned());
        let span = CountingSpan {
            finished: Arc::clone(&self.finished),
        };
        (ctx.clone(), Box::new(span))
    }
}

struct Harness {
    server: MockServer,
    client: RemoteClient,
    sink: Arc<RecordingSink>,
    tracer: Arc<CountingTracer>,
}

impl Harness {
    fn new() -> Self {
        Self::with_breaker(Arc::new(RollingCircuitBreaker::new(
            CircuitBreakerConfig::default(),
        )))
    }

    fn with_breaker(breaker: Arc<RollingCircuitBreaker>) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let tracer = Arc::new(CountingTracer::default());
        let client = RemoteClient::builder()
            .allow_insecure_http()
            .diagnostics_sink(Arc::clone(&sink) as Arc<dyn DiagnosticsSink>)
            .tracer(Arc::clone(&tracer) as Arc<dyn Tracer>)
            .circuit_breaker(breaker)
            .build()
            .unwrap();
        Self {
            server: MockServer::start(),
            client,
            sink,
            tracer,
        }
    }

    fn service(&self) -> Arc<dyn RemoteService> {
        Arc::new(StaticService::new("users", self.server.address().to_string()))
    }

    fn finished_spans(&self) -> Vec<String> {
        self.tracer.finished.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn test_poisoned_builder_returns_first_error_without_io() {
    let h = Harness::new();
    let mock = h.server.mock(|_when, then| {
        then.status(200).json_body(json!({}));
    });

    let err = h
        .client
        .get(h.service(), "/users/{id}")
        .route("id", "42")
        .header("bad header", "x")
        .query("", "ignored")
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::ConfigPoisoned { step: "header", .. }));
    mock.assert_calls(0);
    assert!(h.finished_spans().is_empty(), "no span for a poisoned call");

    let diag = h.sink.single();
    assert!(diag.contains(keys::CONFIG_ERROR));
    assert_eq!(diag.get(keys::ERROR_KIND), Some(&Value::from("config_poisoned")));
}

#[tokio::test]
async fn test_routes_resolve_into_request_path() {
    let h = Harness::new();
    let mock = h.server.mock(|when, then| {
        when.method(GET).path("/users/42/orders/7");
        then.status(200).json_body(json!({"order": 7}));
    });

    let body: Value = h
        .client
        .get(h.service(), "/users/{id}/orders/{oid}")
        .routes([("id", "42"), ("oid", "7")])
        .exec()
        .await
        .unwrap();

    assert_eq!(body, json!({"order": 7}));
    mock.assert_calls(1);
}

#[tokio::test]
async fn test_missing_route_fails_before_dispatch() {
    let h = Harness::new();
    let mock = h.server.mock(|_when, then| {
        then.status(200);
    });

    let err = h
        .client
        .get(h.service(), "/users/{id}/orders/{oid}")
        .route("id", "42")
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::MissingRouteParam { ref param } if param == "oid"));
    mock.assert_calls(0);
    assert_eq!(
        h.sink.single().get(keys::MISSING_ROUTE_PARAM),
        Some(&Value::from("oid"))
    );
}

#[tokio::test]
async fn test_query_order_is_preserved_on_the_wire() {
    let h = Harness::new();
    let mock = h.server.mock(|when, then| {
        when.method(GET)
            .path("/search")
            .query_param("a", "1")
            .query_param("a", "2")
            .query_param("b", "x");
        then.status(200).json_body(json!([]));
    });

    let _: Vec<Value> = h
        .client
        .get(h.service(), "/search")
        .query("a", "1")
        .query("b", "x")
        .query("a", "2")
        .exec()
        .await
        .unwrap();

    mock.assert_calls(1);
    let diag = h.sink.single();
    let url = diag.get(keys::URL).and_then(Value::as_str).unwrap();
    assert!(url.ends_with("/search?a=1&a=2&b=x"), "unexpected url {url}");
}

#[tokio::test]
async fn test_status_classification() {
    let h = Harness::new();
    for code in [200u16, 201, 299, 300, 404, 500] {
        let _m = h.server.mock(|when, then| {
            when.method(GET).path(format!("/status/{code}"));
            then.status(code).body("null");
        });
    }

    for code in [200u16, 201, 299] {
        let status = h
            .client
            .get(h.service(), "/status/{code}")
            .route("code", code.to_string())
            .exec_no_content()
            .await
            .unwrap();
        assert_eq!(status.as_u16(), code);
    }

    for code in [300u16, 404, 500] {
        let err = h
            .client
            .get(h.service(), "/status/{code}")
            .route("code", code.to_string())
            .exec::<Value>()
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::BadStatus { .. }), "{code}: {err:?}");
        assert_eq!(err.status().map(|s| s.as_u16()), Some(code));
    }

    let published = h.sink.take();
    assert_eq!(published.len(), 6);
    for (diag, _) in &published {
        assert!(diag.contains(keys::STATUS));
    }
}

#[tokio::test]
async fn test_bad_status_keeps_body_preview() {
    let h = Harness::new();
    h.server.mock(|when, then| {
        when.method(GET).path("/users/1");
        then.status(404).body("user 1 not found");
    });

    let err = h
        .client
        .get(h.service(), "/users/{id}")
        .route("id", "1")
        .exec::<Value>()
        .await
        .unwrap_err();

    match err {
        RemoteError::BadStatus {
            status,
            body_preview,
        } => {
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body_preview, "user 1 not found");
        }
        other => panic!("expected BadStatus, got {other:?}"),
    }
    let diag = h.sink.single();
    assert_eq!(diag.get(keys::STATUS), Some(&Value::from(404)));
    assert_eq!(diag.get(keys::RESPONSE_BODY), Some(&Value::from("user 1 not found")));
}

#[tokio::test]
async fn test_open_circuit_short_circuits_without_io() {
    let breaker = Arc::new(RollingCircuitBreaker::new(CircuitBreakerConfig {
        request_volume_threshold: 2,
        error_percent_threshold: 50,
        sleep_window_ms: 60_000,
        ..Default::default()
    }));
    let h = Harness::with_breaker(Arc::clone(&breaker));
    let mock = h.server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(503);
    });

    for _ in 0..2 {
        let err = h
            .client
            .get(h.service(), "/flaky")
            .circuit_breaker(true)
            .exec::<Value>()
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::BadStatus { .. }));
    }
    assert_eq!(breaker.state("users:/flaky"), CircuitState::Open);
    h.sink.take();

    let started = Instant::now();
    let err = h
        .client
        .get(h.service(), "/flaky")
        .circuit_breaker(true)
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(err.is_circuit_open());
    assert_eq!(err.status(), None);
    mock.assert_calls(2);

    let diag = h.sink.single();
    assert_eq!(diag.get(keys::CIRCUIT_OPEN), Some(&Value::from(true)));
    assert_eq!(h.finished_spans().last().map(String::as_str), Some("err:circuit_open"));
}

#[tokio::test]
async fn test_successful_probe_closes_circuit() {
    let breaker = Arc::new(RollingCircuitBreaker::new(CircuitBreakerConfig {
        request_volume_threshold: 1,
        sleep_window_ms: 0,
        ..Default::default()
    }));
    let h = Harness::with_breaker(Arc::clone(&breaker));

    let mut failing = h.server.mock(|when, then| {
        when.method(GET).path("/recovering");
        then.status(500);
    });
    let err = h
        .client
        .get(h.service(), "/recovering")
        .circuit_breaker(true)
        .exec::<Value>()
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::BadStatus { .. }));
    assert_eq!(breaker.state("users:/recovering"), CircuitState::Open);

    failing.delete();
    h.server.mock(|when, then| {
        when.method(GET).path("/recovering");
        then.status(200).json_body(json!({"up": true}));
    });

    let body: Value = h
        .client
        .get(h.service(), "/recovering")
        .circuit_breaker(true)
        .exec()
        .await
        .unwrap();
    assert_eq!(body, json!({"up": true}));
    assert_eq!(breaker.state("users:/recovering"), CircuitState::Closed);
}

#[tokio::test]
async fn test_local_failures_leave_circuit_closed() {
    let breaker = Arc::new(RollingCircuitBreaker::new(CircuitBreakerConfig {
        request_volume_threshold: 1,
        ..Default::default()
    }));
    let h = Harness::with_breaker(Arc::clone(&breaker));

    for _ in 0..3 {
        let err = h
            .client
            .get(h.service(), "/users/{id}")
            .circuit_breaker(true)
            .exec::<Value>()
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::MissingRouteParam { .. }));
    }
    assert_eq!(breaker.state("users:/users/{id}"), CircuitState::Closed);
    assert_eq!(breaker.window("users:/users/{id}"), (0, 0));
}

#[tokio::test]
async fn test_span_finalized_once_on_decode_failure() {
    let h = Harness::new();
    h.server.mock(|when, then| {
        when.method(GET).path("/users/9");
        then.status(200).body("<html>not json</html>");
    });

    let err = h
        .client
        .get(h.service(), "/users/{id}")
        .route("id", "9")
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Decode { status, .. } if status == StatusCode::OK));
    assert_eq!(err.status(), Some(StatusCode::OK));
    assert_eq!(
        h.tracer.started.lock().unwrap().clone(),
        vec!["users:/users/{id}".to_owned()]
    );
    assert_eq!(h.finished_spans(), vec!["err:decode".to_owned()]);

    let diag = h.sink.single();
    assert_eq!(
        diag.get(keys::RESPONSE_BODY),
        Some(&Value::from("<html>not json</html>"))
    );
    assert_eq!(diag.get(keys::RESPONSE_LENGTH), Some(&Value::from(21)));
}

#[tokio::test]
async fn test_span_records_success_status() {
    let h = Harness::new();
    h.server.mock(|when, then| {
        when.method(POST).path("/users");
        then.status(201).json_body(json!({"id": 5}));
    });

    let _: Value = h
        .client
        .post(h.service(), "/users")
        .json(json!({"name": "alice"}))
        .exec()
        .await
        .unwrap();

    assert_eq!(h.finished_spans(), vec!["ok:201".to_owned()]);
}

#[tokio::test]
async fn test_tracing_can_be_disabled_per_call() {
    let h = Harness::new();
    h.server.mock(|when, then| {
        when.method(GET).path("/quiet");
        then.status(204);
    });

    h.client
        .get(h.service(), "/quiet")
        .tracing(false)
        .exec_no_content()
        .await
        .unwrap();

    assert!(h.tracer.started.lock().unwrap().is_empty());
    assert!(h.finished_spans().is_empty());
}

#[tokio::test]
async fn test_missing_address_fails_without_io() {
    let h = Harness::new();
    let service: Arc<dyn RemoteService> = Arc::new(StaticService::unavailable("billing"));

    let err = h
        .client
        .get(service, "/invoices")
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::NoAvailableRemote { ref service } if service == "billing"));
    assert_eq!(h.finished_spans(), vec!["err:no_available_remote".to_owned()]);
    assert_eq!(
        h.sink.single().get(keys::ERROR_KIND),
        Some(&Value::from("no_available_remote"))
    );
}

#[tokio::test]
async fn test_deadline_aborts_slow_call() {
    let h = Harness::new();
    h.server.mock(|when, then| {
        when.method(GET).path("/slow");
        then.status(200)
            .json_body(json!({}))
            .delay(Duration::from_secs(5));
    });

    let started = Instant::now();
    let err = h
        .client
        .get(h.service(), "/slow")
        .context(CallContext::new().with_timeout(Duration::from_millis(100)))
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(matches!(
        err,
        RemoteError::Cancelled {
            reason: CancelReason::DeadlineExceeded
        }
    ));
    assert_eq!(h.finished_spans(), vec!["err:cancelled".to_owned()]);
    assert!(h.sink.single().contains(keys::CANCELLED));
}

#[tokio::test]
async fn test_cancelled_context_never_dispatches() {
    let h = Harness::new();
    let mock = h.server.mock(|_when, then| {
        then.status(200);
    });

    let token = CancellationToken::new();
    token.cancel();

    let err = h
        .client
        .get(h.service(), "/anything")
        .context(CallContext::new().with_cancellation(token))
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    mock.assert_calls(0);
}

#[tokio::test]
async fn test_json_payload_and_headers_are_sent() {
    let h = Harness::new();
    let mock = h.server.mock(|when, then| {
        when.method(PUT)
            .path("/users/3")
            .header("content-type", "application/json")
            .header("x-tenant", "acme")
            .json_body(json!({"name": "bob"}));
        then.status(200).json_body(json!({"id": 3, "name": "bob"}));
    });

    let body: Value = h
        .client
        .put(h.service(), "/users/{id}")
        .route("id", "3")
        .header("x-tenant", "other")
        .header("x-tenant", "acme")
        .json(json!({"name": "alice"}))
        .json(json!({"name": "bob"}))
        .exec()
        .await
        .unwrap();

    assert_eq!(body["name"], "bob");
    mock.assert_calls(1);
}

#[derive(Clone, PartialEq, prost::Message)]
struct Ping {
    #[prost(string, tag = "1")]
    id: String,
}

#[tokio::test]
async fn test_binary_payload_is_sent_and_json_decoded() {
    use prost::Message as _;

    let h = Harness::new();
    let ping = Ping {
        id: "abc".to_owned(),
    };
    let encoded = String::from_utf8(ping.encode_to_vec()).unwrap();

    let mock = h.server.mock(|when, then| {
        when.method(POST)
            .path("/ping")
            .header("content-type", "application/x-protobuf")
            .body(encoded);
        then.status(200).json_body(json!({"pong": "abc"}));
    });

    let body: Value = h
        .client
        .post(h.service(), "/ping")
        .header("content-type", "application/x-protobuf")
        .binary(ping)
        .exec()
        .await
        .unwrap();

    assert_eq!(body, json!({"pong": "abc"}));
    mock.assert_calls(1);
}

#[tokio::test]
async fn test_encode_failure_never_dispatches() {
    struct Unserializable;

    impl serde::Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cannot serialize"))
        }
    }

    let h = Harness::new();
    let mock = h.server.mock(|_when, then| {
        then.status(200);
    });

    let err = h
        .client
        .post(h.service(), "/users")
        .json(Unserializable)
        .exec::<Value>()
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Encode { .. }));
    mock.assert_calls(0);
}

#[tokio::test]
async fn test_success_diagnostics_are_published_once() {
    let h = Harness::new();
    h.server.mock(|when, then| {
        when.method(GET).path("/users/7");
        then.status(200).body(r#"{"id":7}"#);
    });

    let _: Value = h
        .client
        .get(h.service(), "/users/{id}")
        .route("id", "7")
        .exec()
        .await
        .unwrap();

    let mut published = h.sink.take();
    assert_eq!(published.len(), 1);
    let (diag, error) = published.remove(0);
    assert!(error.is_none());
    assert_eq!(diag.get(keys::SERVICE), Some(&Value::from("users")));
    assert_eq!(diag.get(keys::IDENTITY), Some(&Value::from("users:/users/{id}")));
    assert_eq!(diag.get(keys::METHOD), Some(&Value::from("GET")));
    assert_eq!(diag.get(keys::STATUS), Some(&Value::from(200)));
    assert_eq!(diag.get(keys::RESPONSE_LENGTH), Some(&Value::from(8)));
    assert!(!diag.contains(keys::ERROR));
}
