use crate::breaker::CircuitBreaker;
use crate::builder::RemoteClientBuilder;
use crate::config::TransportSecurity;
use crate::diagnostics::DiagnosticsSink;
use crate::error::RemoteError;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use crate::service::RemoteService;
use crate::tracer::Tracer;
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::Full;
use std::sync::Arc;
use tower::util::BoxCloneSyncService;

/// Type-erased transport: one request in, one response (any status) out.
pub type Dispatcher =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, RemoteError>;

pub struct ClientShared {
    pub dispatcher: Dispatcher,
    pub breaker: Arc<dyn CircuitBreaker>,
    pub tracer: Arc<dyn Tracer>,
    pub sink: Arc<dyn DiagnosticsSink>,
    pub max_body_size: usize,
    pub transport: TransportSecurity,
    pub tracing: bool,
    pub circuit_breaker: bool,
}

/// Entry point for remote calls.
///
/// Holds the pooled transport and the resilience collaborators. Every call
/// gets its own [`RequestBuilder`]; builders are never shared.
///
/// # Thread Safety
///
/// `RemoteClient` is `Clone + Send + Sync` and cloning is an `Arc` bump.
/// Store it directly, no `Mutex` needed.
///
/// # Example
///
/// ```ignore
/// let users: Arc<dyn RemoteService> = Arc::new(StaticService::new("users", "users.svc:8080"));
/// let client = RemoteClient::builder().build()?;
///
/// let user: User = client
///     .get(Arc::clone(&users), "/users/{id}")
///     .route("id", "42")
///     .query("expand", "orders")
///     .exec()
///     .await?;
/// ```
#[derive(Clone)]
pub struct RemoteClient {
    shared: Arc<ClientShared>,
}

impl RemoteClient {
    /// Create a client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, RemoteError> {
        RemoteClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> RemoteClientBuilder {
        RemoteClientBuilder::new()
    }

    pub(crate) fn from_shared(shared: ClientShared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Start a call to `service` at `path_template`.
    ///
    /// The template may contain `{name}` placeholders filled with
    /// [`RequestBuilder::route`].
    pub fn request(
        &self,
        service: Arc<dyn RemoteService>,
        method: Method,
        path_template: impl Into<String>,
    ) -> RequestBuilder {
        RequestBuilder::new(
            Arc::clone(&self.shared),
            service,
            method,
            path_template.into(),
        )
    }

    pub fn get(&self, service: Arc<dyn RemoteService>, path_template: impl Into<String>) -> RequestBuilder {
        self.request(service, Method::GET, path_template)
    }

    pub fn post(&self, service: Arc<dyn RemoteService>, path_template: impl Into<String>) -> RequestBuilder {
        self.request(service, Method::POST, path_template)
    }

    pub fn put(&self, service: Arc<dyn RemoteService>, path_template: impl Into<String>) -> RequestBuilder {
        self.request(service, Method::PUT, path_template)
    }

    pub fn patch(&self, service: Arc<dyn RemoteService>, path_template: impl Into<String>) -> RequestBuilder {
        self.request(service, Method::PATCH, path_template)
    }

    pub fn delete(&self, service: Arc<dyn RemoteService>, path_template: impl Into<String>) -> RequestBuilder {
        self.request(service, Method::DELETE, path_template)
    }

    #[must_use]
    pub fn transport(&self) -> TransportSecurity {
        self.shared.transport
    }
}
