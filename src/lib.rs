//! # TaskLane
//!
//! Concurrent task orchestration and resilience primitives for tokio
//! services: data partitioning, a bounded parallel execution engine, a
//! batch task manager with progress and cancellation, circuit breaking,
//! retry with jittered exponential backoff, centralized error handling,
//! async locks, a typed event aggregator, and a background services host.
//!
//! ## Architecture
//!
//! - **partition**: splits index ranges and item collections into balanced
//!   work units sized to the configured degree of parallelism
//! - **execution**: runs a transform over a partitioned source with bounded
//!   concurrency, ordered or unordered collection, and cooperative
//!   cancellation
//! - **batch**: schedules named long-running tasks under a concurrency
//!   ceiling with progress reporting, state queries, and result retrieval
//! - **resilience**: circuit breaker, retry policy, and the error handling
//!   service that classifies failures and decides recovery actions
//! - **sync**: asynchronous mutual exclusion and reader/writer coordination
//!   that never blocks a runtime thread
//! - **events**: thread-safe publish/subscribe decoupling producers from
//!   consumers, with handler isolation and optional dispatcher marshaling
//! - **host**: lifecycle owner for pollers, with bounded start retry,
//!   rollback, and per-poller stop timeouts
//!
//! ## Example
//!
//! ```no_run
//! use tasklane::config::PartitionConfig;
//! use tasklane::execution::{ExecutionOptions, ParallelExecutionEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ParallelExecutionEngine::new(PartitionConfig::default());
//! let doubled = engine
//!     .execute(
//!         vec![1u64, 2, 3, 4],
//!         |n| async move { Ok::<_, std::convert::Infallible>(n * 2) },
//!         &ExecutionOptions::default(),
//!     )
//!     .await?;
//! assert_eq!(doubled, vec![2, 4, 6, 8]);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod host;
pub mod partition;
pub mod resilience;
pub mod sync;

pub use batch::{BatchTaskManager, ProgressReport, TaskSnapshot, TaskState};
pub use config::{
    BatchManagerConfig, CircuitBreakerConfig, HostConfig, PartitionConfig, PollerConfig,
    RetryConfig,
};
pub use error::{CategoryGroup, CoreError, ErrorCategory, Result};
pub use events::EventAggregator;
pub use execution::{ExecutionOptions, ParallelExecutionEngine};
pub use host::{BackgroundServicesHost, IntervalPoller, Poller};
pub use partition::PartitionPlanner;
pub use resilience::{CircuitBreaker, ErrorHandlingService, RetryPolicy};
pub use sync::{AsyncLock, AsyncReaderWriterLock};

/// Crate version, from the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
