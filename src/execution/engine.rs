//! Bounded-parallelism execution over partitions and sequences.

use crate::config::{effective_degree, PartitionConfig};
use crate::partition::PartitionPlanner;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-run execution options.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Worker cap. `0` means "use available cores".
    pub max_degree_of_parallelism: usize,

    /// When false, result ordering is unspecified but every input element
    /// is still processed exactly once.
    pub preserve_ordering: bool,

    /// Cancellation signal polled at least once per element.
    pub cancellation: CancellationToken,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_degree_of_parallelism: 0,
            preserve_ordering: true,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Errors surfaced by an engine run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError<E> {
    /// Cancellation was observed mid-run; partial results are discarded.
    #[error("execution cancelled")]
    Cancelled,

    /// An element transform failed; the run stops at the first failure.
    #[error("transform failed: {0}")]
    Failed(E),
}

/// Runs transforms over sources with bounded parallelism.
///
/// Chunked runs derive their partition layout from the planner this engine
/// was constructed with.
#[derive(Debug, Clone, Default)]
pub struct ParallelExecutionEngine {
    planner: PartitionPlanner,
}

impl ParallelExecutionEngine {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            planner: PartitionPlanner::new(config),
        }
    }

    /// Apply `transform` to every element of `source` with at most
    /// `max_degree_of_parallelism` transforms in flight.
    ///
    /// Cancellation is polled before each element; once observed, the whole
    /// run resolves to [`EngineError::Cancelled`] and partial results are
    /// discarded. The first transform failure likewise fails the run.
    pub async fn execute<T, R, E, F, Fut>(
        &self,
        source: Vec<T>,
        transform: F,
        options: &ExecutionOptions,
    ) -> Result<Vec<R>, EngineError<E>>
    where
        F: Fn(T) -> Fut + Clone,
        Fut: Future<Output = Result<R, E>>,
    {
        let degree = effective_degree(options.max_degree_of_parallelism);
        let token = options.cancellation.clone();
        let total = source.len();

        debug!(
            total,
            degree,
            preserve_ordering = options.preserve_ordering,
            "starting parallel execution"
        );

        let element_futures = source.into_iter().map(|item| {
            let transform = transform.clone();
            let token = token.clone();
            async move {
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                transform(item).await.map_err(EngineError::Failed)
            }
        });

        if options.preserve_ordering {
            stream::iter(element_futures)
                .buffered(degree)
                .try_collect()
                .await
        } else {
            stream::iter(element_futures)
                .buffer_unordered(degree)
                .try_collect()
                .await
        }
    }

    /// Chunked variant: the source is split by the engine's partition
    /// planner and chunks run in parallel, each chunk processing its
    /// elements sequentially. Cancellation is polled at every element, so
    /// chunk boundaries never delay a cancellation observation.
    pub async fn execute_chunked<T, R, E, F, Fut>(
        &self,
        source: Vec<T>,
        transform: F,
        options: &ExecutionOptions,
    ) -> Result<Vec<R>, EngineError<E>>
    where
        F: Fn(T) -> Fut + Clone,
        Fut: Future<Output = Result<R, E>>,
    {
        let degree = effective_degree(options.max_degree_of_parallelism);
        let token = options.cancellation.clone();
        let partitions = self.planner.plan_chunks(source);

        debug!(
            partition_count = partitions.len(),
            degree, "starting chunked parallel execution"
        );

        let chunk_futures = partitions.into_iter().map(|partition| {
            let transform = transform.clone();
            let token = token.clone();
            async move {
                let mut results = Vec::with_capacity(partition.items.len());
                for item in partition.items {
                    if token.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    results.push(transform(item).await.map_err(EngineError::Failed)?);
                }
                Ok(results)
            }
        });

        let chunks: Vec<Vec<R>> = if options.preserve_ordering {
            stream::iter(chunk_futures)
                .buffered(degree)
                .try_collect()
                .await?
        } else {
            stream::iter(chunk_futures)
                .buffer_unordered(degree)
                .try_collect()
                .await?
        };

        Ok(chunks.into_iter().flatten().collect())
    }
}
