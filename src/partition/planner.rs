//! Partition planner implementation.

use crate::config::PartitionConfig;
use crate::error::{CoreError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// A contiguous index chunk `[start, end)` assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPartition {
    /// Position of this chunk in the overall plan.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl IndexPartition {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A materialized chunk of an input sequence.
#[derive(Debug, Clone)]
pub struct Partition<T> {
    /// Position of this chunk in the overall plan.
    pub index: usize,
    pub items: Vec<T>,
}

/// Plans work partitions from a dataset or index range.
///
/// The planner derives chunk sizes from the configured degree of parallelism:
/// an explicit override always wins; small inputs and the default policy
/// target `degree * 4` chunks; memory-optimized mode targets `degree * 16`
/// chunks for a smaller per-chunk footprint. Chunk size never drops below 1.
#[derive(Debug, Clone, Default)]
pub struct PartitionPlanner {
    config: PartitionConfig,
}

impl PartitionPlanner {
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    /// Split `[0, size)` into ordered index partitions covering every index
    /// exactly once. An empty range yields zero partitions.
    pub fn plan_range(&self, size: usize) -> Vec<IndexPartition> {
        let degree = self.config.effective_degree();
        let chunk_size = self.chunk_size_for(size, degree);

        let mut partitions = Vec::new();
        let mut start = 0;
        while start < size {
            let end = (start + chunk_size).min(size);
            partitions.push(IndexPartition {
                index: partitions.len(),
                start,
                end,
            });
            start = end;
        }

        debug!(
            size,
            degree,
            chunk_size,
            partition_count = partitions.len(),
            "planned range partitions"
        );

        partitions
    }

    /// Split an existing sequence into ordered chunks using the same sizing
    /// policy as [`plan_range`](Self::plan_range).
    pub fn plan_chunks<T>(&self, items: Vec<T>) -> Vec<Partition<T>> {
        let degree = self.config.effective_degree();
        let chunk_size = self.chunk_size_for(items.len(), degree);

        let mut partitions = Vec::new();
        let mut chunk = Vec::with_capacity(chunk_size.min(items.len()));
        for item in items {
            chunk.push(item);
            if chunk.len() == chunk_size {
                partitions.push(Partition {
                    index: partitions.len(),
                    items: std::mem::take(&mut chunk),
                });
            }
        }
        if !chunk.is_empty() {
            partitions.push(Partition {
                index: partitions.len(),
                items: chunk,
            });
        }

        partitions
    }

    /// Distribute items into `degree` groups balanced by estimated cost.
    ///
    /// Items are sorted by cost descending (stable), then each is assigned
    /// to the group with the lowest accumulated cost. Deterministic for a
    /// given input order, and close to optimal for a greedy heuristic.
    pub fn plan_balanced<T, F>(
        &self,
        items: Vec<T>,
        cost_fn: F,
        degree: usize,
    ) -> Result<Vec<Vec<T>>>
    where
        F: Fn(&T) -> f64,
    {
        if degree == 0 {
            return Err(CoreError::InvalidArgument(
                "balanced partitioning requires at least one group".to_string(),
            ));
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut costed: Vec<(f64, T)> = Vec::with_capacity(items.len());
        for item in items {
            let cost = cost_fn(&item);
            if !cost.is_finite() {
                return Err(CoreError::InvalidArgument(format!(
                    "cost estimator returned a non-finite value: {cost}"
                )));
            }
            costed.push((cost, item));
        }
        costed.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut groups: Vec<Vec<T>> = (0..degree).map(|_| Vec::new()).collect();
        let mut totals = vec![0.0_f64; degree];
        for (cost, item) in costed {
            let lightest = totals
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            totals[lightest] += cost;
            groups[lightest].push(item);
        }

        Ok(groups)
    }

    /// Group items into grid cells over their geographic bounding box.
    ///
    /// The box is divided into a `g x g` grid where `g = ceil(sqrt(degree))`,
    /// so at most `g^2` non-empty cells come back. A zero-span axis collapses
    /// to index 0, and empty cells are dropped from the result.
    pub fn plan_geographic<T, LatF, LonF>(
        &self,
        items: Vec<T>,
        lat_fn: LatF,
        lon_fn: LonF,
        degree: usize,
    ) -> Result<Vec<Vec<T>>>
    where
        LatF: Fn(&T) -> f64,
        LonF: Fn(&T) -> f64,
    {
        if degree == 0 {
            return Err(CoreError::InvalidArgument(
                "geographic partitioning requires at least one cell".to_string(),
            ));
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let grid = (degree as f64).sqrt().ceil() as usize;

        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        for item in &items {
            let (lat, lon) = (lat_fn(item), lon_fn(item));
            if !lat.is_finite() || !lon.is_finite() {
                return Err(CoreError::InvalidArgument(format!(
                    "coordinate accessor returned a non-finite value: ({lat}, {lon})"
                )));
            }
            min_lat = min_lat.min(lat);
            max_lat = max_lat.max(lat);
            min_lon = min_lon.min(lon);
            max_lon = max_lon.max(lon);
        }

        let lat_step = (max_lat - min_lat) / grid as f64;
        let lon_step = (max_lon - min_lon) / grid as f64;

        let axis_cell = |value: f64, min: f64, step: f64| -> usize {
            if step <= 0.0 {
                return 0;
            }
            (((value - min) / step).floor() as usize).min(grid - 1)
        };

        let mut cells: BTreeMap<usize, Vec<T>> = BTreeMap::new();
        for item in items {
            let row = axis_cell(lat_fn(&item), min_lat, lat_step);
            let col = axis_cell(lon_fn(&item), min_lon, lon_step);
            cells.entry(row * grid + col).or_default().push(item);
        }

        debug!(
            degree,
            grid,
            cell_count = cells.len(),
            "planned geographic partitions"
        );

        Ok(cells.into_values().collect())
    }

    /// Derived chunk size policy. Explicit override wins; small inputs and
    /// the default both target `degree * 4` chunks; memory-optimized mode
    /// targets `degree * 16` chunks.
    fn chunk_size_for(&self, size: usize, degree: usize) -> usize {
        let chunk_size = if let Some(requested) = self.config.chunk_size_override {
            requested
        } else if size < degree * 100 {
            size / (degree * 4)
        } else if self.config.optimize_for_memory {
            size / (degree * 16)
        } else {
            size / (degree * 4)
        };
        chunk_size.max(1)
    }
}
