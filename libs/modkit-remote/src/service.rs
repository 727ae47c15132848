//! Service discovery seam.

/// A logical remote service.
///
/// The name feeds the resilience identity; the address is looked up for
/// every call, so implementations may rotate or drain instances freely.
pub trait RemoteService: Send + Sync {
    /// Logical service name, stable across instances.
    fn name(&self) -> &str;

    /// Network authority (`host` or `host:port`) of an instance to call,
    /// or `None` when no instance is available.
    fn address(&self) -> Option<String>;
}

/// A service with a fixed address.
#[derive(Debug, Clone)]
pub struct StaticService {
    name: String,
    address: Option<String>,
}

impl StaticService {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: Some(address.into()),
        }
    }

    /// A service with no reachable instance.
    #[must_use]
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }
}

impl RemoteService for StaticService {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> Option<String> {
        self.address.clone()
    }
}
