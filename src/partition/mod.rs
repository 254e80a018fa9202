//! # Partition Planning
//!
//! Splits a dataset or index range into work chunks for the parallel
//! execution engine. Four strategies are provided:
//!
//! - **Range**: ordered index chunks covering `[0, size)`
//! - **Chunked**: the same sizing policy over an existing sequence
//! - **Load-balanced**: greedy assignment into cost-balanced groups
//! - **Geographic**: bounding-box grid cells for spatial workloads
//!
//! The planner produces partitions and retains no ownership of them; chunk
//! size and count are derived from the configured degree of parallelism
//! unless an explicit override is set.

mod planner;

pub use planner::{IndexPartition, Partition, PartitionPlanner};
