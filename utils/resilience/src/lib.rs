//! Resilience primitives shared by the backup service: a three-state
//! circuit breaker and a cancellable exponential-backoff retry executor.
//!
//! The breaker guards a failure domain (one instance per downstream), the
//! executor wraps a single logical operation. Layering is breaker outside,
//! retry inside, so one retried operation counts as one breaker outcome.

mod breaker;
mod retry;

pub use breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use retry::{RetryError, RetryExecutor, BACKOFF_CAP};
