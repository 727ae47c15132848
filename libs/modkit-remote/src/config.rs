use serde::Deserialize;
use std::time::Duration;

/// Default User-Agent string for remote calls
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-remote/", env!("CARGO_PKG_VERSION"));

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
///
/// Controls whether builders may switch a call to plain `http://`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (in-cluster traffic, mock servers)
    AllowInsecureHttp,
}

/// Thresholds for the rolling-window circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Minimum calls in the window before the error rate is evaluated.
    pub request_volume_threshold: u32,
    /// Failure percentage (0-100) at which the circuit opens.
    pub error_percent_threshold: u8,
    /// How long an open circuit rejects calls before admitting a probe.
    pub sleep_window_ms: u64,
    /// Length of the rolling statistics window.
    pub rolling_window_ms: u64,
    /// Number of buckets the window is split into.
    pub rolling_buckets: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: 20,
            error_percent_threshold: 50,
            sleep_window_ms: 5_000,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window_ms)
    }

    #[must_use]
    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }

    /// Width of one window bucket, never zero.
    #[must_use]
    pub fn bucket_width(&self) -> Duration {
        let buckets = self.rolling_buckets.max(1);
        (self.rolling_window() / buckets).max(Duration::from_millis(1))
    }
}

/// Overall remote client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteClientConfig {
    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value, applied unless a call sets its own
    pub user_agent: String,

    /// Transport security mode (default: `tls_only`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `web_pki`)
    pub tls_roots: TlsRootConfig,

    /// TCP connect timeout; `None` leaves it to the OS
    pub connect_timeout_ms: Option<u64>,

    /// Idle pooled connections are closed after this long (default: 90s)
    pub pool_idle_timeout_ms: Option<u64>,

    /// Maximum idle connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,

    /// Whether new calls open a tracing span (default: true)
    pub tracing: bool,

    /// Whether new calls run under the circuit breaker (default: false)
    pub circuit_breaker: bool,

    /// Dedicated breaker thresholds for this client.
    ///
    /// When absent the process-wide breaker is shared.
    pub breaker: Option<CircuitBreakerConfig>,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10 MB
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            connect_timeout_ms: Some(10_000),
            pool_idle_timeout_ms: Some(90_000),
            pool_max_idle_per_host: 32,
            tracing: true,
            circuit_breaker: false,
            breaker: None,
        }
    }
}

impl RemoteClientConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn pool_idle_timeout(&self) -> Option<Duration> {
        self.pool_idle_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RemoteClientConfig::default();
        assert_eq!(config.max_body_size, 10 * 1024 * 1024);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert!(config.tracing);
        assert!(!config.circuit_breaker);
        assert!(config.breaker.is_none());
        assert_eq!(config.pool_idle_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RemoteClientConfig = serde_json::from_value(serde_json::json!({
            "transport": "allow_insecure_http",
            "circuit_breaker": true,
            "breaker": { "request_volume_threshold": 5, "sleep_window_ms": 250 }
        }))
        .unwrap();

        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert!(config.circuit_breaker);
        let breaker = config.breaker.unwrap();
        assert_eq!(breaker.request_volume_threshold, 5);
        assert_eq!(breaker.sleep_window(), Duration::from_millis(250));
        assert_eq!(breaker.error_percent_threshold, 50);
        assert_eq!(config.max_body_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result = serde_json::from_value::<RemoteClientConfig>(serde_json::json!({
            "retries": 3
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_bucket_width_never_zero() {
        let config = CircuitBreakerConfig {
            rolling_window_ms: 0,
            rolling_buckets: 0,
            ..Default::default()
        };
        assert_eq!(config.bucket_width(), Duration::from_millis(1));

        let config = CircuitBreakerConfig::default();
        assert_eq!(config.bucket_width(), Duration::from_secs(1));
    }
}
