//! Circuit breaking keyed by resilience identity.
//!
//! # States
//! ```text
//! Closed    → Open:      window volume >= threshold and error % >= threshold
//! Open      → Half-Open: sleep window elapsed; one probe is admitted
//! Half-Open → Closed:    probe succeeded (window is reset)
//! Half-Open → Open:      probe failed
//! ```

use crate::config::CircuitBreakerConfig;
use crate::error::RemoteError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

/// State of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; the result feeds the rolling window
    Normal,
    /// The single half-open probe; its result decides the next state
    Probe,
}

/// Result of an admitted call, as far as the breaker is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// The call said nothing about the remote's health
    Ignored,
}

/// The circuit rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

/// Breaker policy. Implementations own thresholds and windows.
pub trait CircuitBreaker: Send + Sync {
    /// Ask to run one call on `circuit`.
    ///
    /// # Errors
    /// Returns `Rejected` when the circuit is open.
    fn try_acquire(&self, circuit: &str) -> Result<Admission, Rejected>;

    /// Report the outcome of a call admitted by `try_acquire`.
    fn record(&self, circuit: &str, admission: Admission, outcome: Outcome);
}

/// Run `unit` under `breaker` on `circuit`.
///
/// A rejected call returns `RemoteError::CircuitOpen` without polling
/// `unit`. If the returned future is dropped mid-flight the admission is
/// released as [`Outcome::Ignored`].
///
/// # Errors
///
/// Returns `RemoteError::CircuitOpen` or the error produced by `unit`.
pub async fn guarded<T, F>(breaker: &dyn CircuitBreaker, circuit: &str, unit: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    let admission = breaker
        .try_acquire(circuit)
        .map_err(|Rejected| RemoteError::CircuitOpen {
            circuit: circuit.to_owned(),
        })?;

    let mut pending = PendingOutcome {
        breaker,
        circuit,
        admission,
        outcome: Outcome::Ignored,
    };
    let result = unit.await;
    pending.outcome = match &result {
        Ok(_) => Outcome::Success,
        Err(err) if err.counts_against_circuit() => Outcome::Failure,
        Err(_) => Outcome::Ignored,
    };
    result
}

/// Records the outcome exactly once, including when the call is dropped.
struct PendingOutcome<'a> {
    breaker: &'a dyn CircuitBreaker,
    circuit: &'a str,
    admission: Admission,
    outcome: Outcome,
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        self.breaker.record(self.circuit, self.admission, self.outcome);
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    successes: u32,
    failures: u32,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    buckets: VecDeque<Bucket>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            probe_in_flight: false,
            buckets: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.start) >= window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn add(&mut self, now: Instant, width: Duration, success: bool) {
        let fresh = self
            .buckets
            .back()
            .is_some_and(|b| now.saturating_duration_since(b.start) < width);
        if !fresh {
            self.buckets.push_back(Bucket {
                start: now,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(bucket) = self.buckets.back_mut() {
            if success {
                bucket.successes += 1;
            } else {
                bucket.failures += 1;
            }
        }
    }

    fn totals(&self) -> (u32, u32) {
        self.buckets.iter().fold((0, 0), |(total, failed), b| {
            (total + b.successes + b.failures, failed + b.failures)
        })
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.probe_in_flight = false;
        self.buckets.clear();
    }
}

/// Process-wide-capable breaker with a bucketed rolling window per circuit.
///
/// Circuits are created lazily on first use and are safe to hit from many
/// concurrent calls; each one is guarded by its own lock.
#[derive(Debug)]
pub struct RollingCircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Arc<Mutex<Circuit>>>,
}

static GLOBAL: LazyLock<Arc<RollingCircuitBreaker>> =
    LazyLock::new(|| Arc::new(RollingCircuitBreaker::new(CircuitBreakerConfig::default())));

impl RollingCircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// The process-wide breaker with default thresholds.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuit(&self, name: &str) -> Arc<Mutex<Circuit>> {
        if let Some(existing) = self.circuits.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.circuits
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(Circuit::new())))
                .value(),
        )
    }

    /// Current state of `circuit`; unknown circuits are closed.
    #[must_use]
    pub fn state(&self, circuit: &str) -> CircuitState {
        self.circuits
            .get(circuit)
            .map_or(CircuitState::Closed, |c| c.lock().state)
    }

    /// Calls and failures currently in the rolling window of `circuit`.
    #[must_use]
    pub fn window(&self, circuit: &str) -> (u32, u32) {
        self.circuits.get(circuit).map_or((0, 0), |c| {
            let mut c = c.lock();
            c.evict(Instant::now(), self.config.rolling_window());
            c.totals()
        })
    }

    fn should_trip(&self, circuit: &Circuit) -> bool {
        let (total, failed) = circuit.totals();
        if total == 0 || total < self.config.request_volume_threshold {
            return false;
        }
        u64::from(failed) * 100 >= u64::from(total) * u64::from(self.config.error_percent_threshold)
    }
}

impl CircuitBreaker for RollingCircuitBreaker {
    fn try_acquire(&self, name: &str) -> Result<Admission, Rejected> {
        let circuit = self.circuit(name);
        let mut circuit = circuit.lock();
        match circuit.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let cooled = circuit
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.sleep_window());
                if cooled {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    tracing::info!(circuit = name, "circuit half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    Err(Rejected)
                }
            }
            CircuitState::HalfOpen if circuit.probe_in_flight => Err(Rejected),
            CircuitState::HalfOpen => {
                circuit.probe_in_flight = true;
                Ok(Admission::Probe)
            }
        }
    }

    fn record(&self, name: &str, admission: Admission, outcome: Outcome) {
        let circuit = self.circuit(name);
        let mut circuit = circuit.lock();
        let now = Instant::now();

        match (admission, outcome) {
            (Admission::Probe, Outcome::Success) => {
                circuit.close();
                tracing::info!(circuit = name, "circuit closed after successful probe");
            }
            (Admission::Probe, Outcome::Failure) => {
                circuit.open(now);
                tracing::warn!(circuit = name, "circuit re-opened after failed probe");
            }
            (Admission::Probe, Outcome::Ignored) => {
                circuit.probe_in_flight = false;
            }
            (Admission::Normal, Outcome::Ignored) => {}
            (Admission::Normal, outcome) => {
                circuit.evict(now, self.config.rolling_window());
                circuit.add(now, self.config.bucket_width(), outcome == Outcome::Success);
                if circuit.state == CircuitState::Closed && self.should_trip(&circuit) {
                    let (total, failed) = circuit.totals();
                    circuit.open(now);
                    tracing::warn!(circuit = name, total, failed, "circuit opened");
                }
            }
        }
    }
}
