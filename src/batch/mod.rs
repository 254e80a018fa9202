//! # Batch Task Management
//!
//! Supervises long-running named executions: each task has a unique id, a
//! state machine (`Pending -> Running -> {Completed | Canceled | Failed}`),
//! a progress snapshot, and a terminal result or error payload. A bounded
//! admission gate caps how many tasks run simultaneously; tasks beyond the
//! ceiling wait in the order they reach the gate.

mod manager;
mod task;

pub use manager::{BatchTaskManager, TaskStats};
pub use task::{ProgressReport, ProgressSink, TaskSnapshot, TaskState};
