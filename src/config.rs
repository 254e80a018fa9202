//! Configuration structs for every framework component.
//!
//! An embedding application constructs these explicitly and passes them in;
//! there is no file loading or ambient environment lookup here. Numeric
//! duration fields use `*_ms`/`*_seconds` suffixes with `Duration` accessor
//! methods.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Partition planning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Worker cap partitions are sized for. `0` means "use available cores".
    pub max_degree_of_parallelism: usize,

    /// Explicit chunk size; wins over every derived policy when set.
    pub chunk_size_override: Option<usize>,

    /// Favor smaller chunks (smaller live footprint) over scheduling overhead.
    pub optimize_for_memory: bool,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_degree_of_parallelism: 0,
            chunk_size_override: None,
            optimize_for_memory: false,
        }
    }
}

impl PartitionConfig {
    /// Effective degree of parallelism, falling back to the core count.
    pub fn effective_degree(&self) -> usize {
        effective_degree(self.max_degree_of_parallelism)
    }
}

/// Resolve a degree-of-parallelism knob, treating zero as "use default".
pub(crate) fn effective_degree(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Circuit breaker thresholds and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit open.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before admitting a trial call.
    pub reset_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_seconds: 30,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_seconds)
    }
}

/// Retry policy shape: attempt budget and backoff curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,

    /// Delay before the second attempt.
    pub initial_delay_ms: u64,

    /// Exponential growth factor applied per subsequent attempt.
    pub backoff_multiplier: f64,

    /// Ceiling for any computed delay.
    pub max_delay_ms: u64,

    /// Fraction (0.0 - 1.0) of multiplicative jitter added to each delay.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Batch task manager admission settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchManagerConfig {
    /// Maximum simultaneously running tasks. `None` means unlimited.
    pub concurrency_ceiling: Option<usize>,
}

/// Per-poller interval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Interval between polls when the interval is not adapting.
    pub polling_interval_ms: u64,

    /// Lower bound the adaptive interval snaps back to on fresh data.
    pub min_interval_ms: u64,

    /// Upper bound the adaptive interval widens toward on unchanged data.
    pub max_interval_ms: u64,

    /// Widen the interval while polls return unchanged data.
    pub adaptive_enabled: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1_000,
            min_interval_ms: 500,
            max_interval_ms: 30_000,
            adaptive_enabled: false,
        }
    }
}

impl PollerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Background services host lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Start attempts per poller before the host gives up and rolls back.
    pub start_attempts: u32,

    /// Seconds granted to each poller during `stop_all` before it is
    /// logged and abandoned.
    pub stop_timeout_seconds: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            start_attempts: 3,
            stop_timeout_seconds: 10,
        }
    }
}

impl HostConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}
