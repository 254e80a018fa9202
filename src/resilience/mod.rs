//! # Resilience Primitives
//!
//! Independent failure-handling utilities composed by callers of the
//! execution engine and the background services host:
//!
//! - **Circuit breaker**: trips open after consecutive failures, fails fast
//!   while open, and probes recovery with a single half-open trial call
//! - **Retry policy**: bounded attempts with jittered exponential backoff
//! - **Error handling service**: central policy dispatch mapping error
//!   categories to actions, with a bounded history and error events
//!
//! Each primitive owns only its own counters; none of them share locks.

mod circuit_breaker;
mod error_handler;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, CircuitState, StateChange,
};
pub use error_handler::{ErrorAction, ErrorHandlingService, ErrorRecord};
pub use retry::{RetryError, RetryPolicy};
