use parking_lot::Mutex;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Concurrent probes admitted while half-open; the same number of
/// consecutive probe successes closes the circuit again.
const HALF_OPEN_LIMIT: u32 = 3;

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open and the operation was not invoked.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },
    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether this error is the fail-fast sentinel.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    half_open_in_flight: u32,
}

/// Three-state failure gate around a fallible async operation.
///
/// Closed passes every call through and counts consecutive failures; at
/// `max_failures` the circuit opens and calls fail fast until
/// `reset_timeout` has elapsed, after which up to [`HALF_OPEN_LIMIT`]
/// concurrent probes are admitted. [`HALF_OPEN_LIMIT`] probe successes
/// close the circuit, any probe failure reopens it.
///
/// State inspection and transition happen under one mutex; the guarded
/// operation itself runs without the lock held.
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

enum Admission {
    Admitted,
    Rejected,
}

impl CircuitBreaker {
    /// New breaker in the closed state.
    pub fn new(name: impl Into<String>, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_failures,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_successes: 0,
                half_open_in_flight: 0,
            }),
        }
    }

    /// Run `op` through the breaker.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.admit() {
            Admission::Rejected => {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                })
            }
            Admission::Admitted => {}
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Current state, transitioning open → half-open if the reset timeout
    /// has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.roll_state(&mut inner);
        inner.state
    }

    /// Consecutive failure count as seen by the closed state.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        self.roll_state(&mut inner);
        match inner.state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::Open => Admission::Rejected,
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < HALF_OPEN_LIMIT {
                    inner.half_open_in_flight += 1;
                    Admission::Admitted
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Open → half-open once the reset timeout has elapsed.
    fn roll_state(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            let expired = inner
                .last_failure
                .map(|at| at.elapsed() > self.reset_timeout)
                .unwrap_or(true);
            if expired {
                debug!(breaker = %self.name, "reset timeout elapsed, probing");
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                inner.half_open_in_flight = 0;
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= HALF_OPEN_LIMIT {
                    debug!(breaker = %self.name, "probes succeeded, closing");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                }
            }
            // A probe admitted while half-open may complete after a sibling
            // failure has already reopened the circuit.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.max_failures {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                warn!(breaker = %self.name, "probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                inner.half_open_in_flight = 0;
                inner.half_open_successes = 0;
            }
        }
    }
}
