//! # Parallel Execution Engine
//!
//! Runs an async fallible transform over a source collection with bounded
//! parallelism, optional ordering, and cooperative cancellation. The engine
//! is agnostic to payload semantics: anything domain-specific (spatial
//! filters, distance math, payload validation) belongs to calling code.

mod engine;

pub use engine::{EngineError, ExecutionOptions, ParallelExecutionEngine};
