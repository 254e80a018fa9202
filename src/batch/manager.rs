//! Batch task manager: registry, admission gate, and state machine.

use crate::batch::task::{ProgressReport, ProgressSink, TaskSnapshot, TaskState};
use crate::config::BatchManagerConfig;
use crate::error::{CoreError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct TaskData {
    state: TaskState,
    progress: ProgressReport,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

struct TaskEntry {
    id: String,
    label: String,
    token: CancellationToken,
    state_tx: watch::Sender<TaskState>,
    data: Mutex<TaskData>,
}

impl TaskEntry {
    fn snapshot(&self) -> TaskSnapshot {
        let data = self.data.lock();
        TaskSnapshot {
            id: self.id.clone(),
            label: self.label.clone(),
            state: data.state,
            progress: data.progress,
            result: data.result.clone(),
            error: data.error.clone(),
            created_at: data.created_at,
            started_at: data.started_at,
            completed_at: data.completed_at,
        }
    }

    /// Apply a terminal transition exactly once; later attempts are ignored
    /// so a terminal state is never left.
    fn finish(
        &self,
        state: TaskState,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        {
            let mut data = self.data.lock();
            if data.state.is_terminal() {
                return;
            }
            data.state = state;
            data.result = result;
            data.error = error;
            data.completed_at = Some(chrono::Utc::now());
        }
        self.state_tx.send_replace(state);
    }
}

/// Per-state task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub canceled: usize,
    pub failed: usize,
}

/// Supervises long-running named executions under a concurrency ceiling.
///
/// The manager exclusively owns task records for their lifetime and is the
/// only mutator of their state. Admission goes through a FIFO counting
/// semaphore, so tasks beyond the ceiling stay Pending in arrival order.
#[derive(Clone)]
pub struct BatchTaskManager {
    tasks: Arc<DashMap<String, Arc<TaskEntry>>>,
    gate: Arc<Semaphore>,
}

impl BatchTaskManager {
    pub fn new(config: BatchManagerConfig) -> Self {
        let permits = config
            .concurrency_ceiling
            .unwrap_or(Semaphore::MAX_PERMITS)
            .min(Semaphore::MAX_PERMITS)
            .max(1);

        info!(
            concurrency_ceiling = ?config.concurrency_ceiling,
            "batch task manager initialized"
        );

        Self {
            tasks: Arc::new(DashMap::new()),
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Schedule a task body under a unique id.
    ///
    /// The body receives a progress sink and a cancellation token, and
    /// returns a result payload or an error. Execution begins once a worker
    /// slot is free; until then the task sits Pending. Scheduling an id that
    /// is already Pending or Running fails with a Conflict; a terminal id
    /// may be scheduled again, replacing the finished record.
    ///
    /// Pending tasks are admitted in the order they reach the gate, which
    /// tracks schedule order but is not a strict guarantee between
    /// near-simultaneous `schedule` calls.
    pub fn schedule<F, Fut>(&self, id: impl Into<String>, label: impl Into<String>, body: F) -> Result<()>
    where
        F: FnOnce(ProgressSink, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let id = id.into();
        let label = label.into();

        let (state_tx, _) = watch::channel(TaskState::Pending);
        let entry = Arc::new(TaskEntry {
            id: id.clone(),
            label,
            token: CancellationToken::new(),
            state_tx,
            data: Mutex::new(TaskData {
                state: TaskState::Pending,
                progress: ProgressReport::default(),
                result: None,
                error: None,
                created_at: chrono::Utc::now(),
                started_at: None,
                completed_at: None,
            }),
        });

        match self.tasks.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().data.lock().state.is_terminal() {
                    return Err(CoreError::Conflict { id });
                }
                occupied.insert(entry.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }

        debug!(task_id = %id, "task scheduled");
        tokio::spawn(Self::run(entry, self.gate.clone(), body));
        Ok(())
    }

    /// Schedule a task body under a generated id and return that id.
    ///
    /// Useful for fire-and-query callers with no natural task key.
    pub fn schedule_generated<F, Fut>(&self, label: impl Into<String>, body: F) -> Result<String>
    where
        F: FnOnce(ProgressSink, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        self.schedule(id.clone(), label, body)?;
        Ok(id)
    }

    async fn run<F, Fut>(entry: Arc<TaskEntry>, gate: Arc<Semaphore>, body: F)
    where
        F: FnOnce(ProgressSink, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        // Wait for an admission slot; a cancel while Pending resolves the
        // task without ever running the body.
        let _permit = tokio::select! {
            permit = gate.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    entry.finish(
                        TaskState::Failed,
                        None,
                        Some("admission gate closed".to_string()),
                    );
                    return;
                }
            },
            _ = entry.token.cancelled() => {
                info!(task_id = %entry.id, "task canceled while pending");
                entry.finish(TaskState::Canceled, None, None);
                return;
            }
        };

        {
            let mut data = entry.data.lock();
            data.state = TaskState::Running;
            data.started_at = Some(chrono::Utc::now());
        }
        entry.state_tx.send_replace(TaskState::Running);
        debug!(task_id = %entry.id, "task running");

        let progress_entry = entry.clone();
        let sink: ProgressSink = Arc::new(move |report| {
            progress_entry.data.lock().progress = report;
        });

        let outcome = AssertUnwindSafe(body(sink, entry.token.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                info!(task_id = %entry.id, "task completed");
                entry.finish(TaskState::Completed, Some(value), None);
            }
            Ok(Err(err)) if entry.token.is_cancelled() => {
                info!(task_id = %entry.id, "task observed cancellation");
                entry.finish(TaskState::Canceled, None, Some(format!("{err:#}")));
            }
            Ok(Err(err)) => {
                warn!(task_id = %entry.id, error = %err, "task failed");
                entry.finish(TaskState::Failed, None, Some(format!("{err:#}")));
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task body panicked".to_string());
                warn!(task_id = %entry.id, panic = %message, "task body panicked");
                entry.finish(TaskState::Failed, None, Some(message));
            }
        }
    }

    /// Request cooperative cancellation. Returns true only if the task was
    /// Pending or Running when the request was issued; the transition to
    /// Canceled happens once the body observes the signal.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.tasks.get(id) else {
            return false;
        };
        let was_live = !entry.data.lock().state.is_terminal();
        if was_live {
            info!(task_id = %id, "cancellation requested");
            entry.token.cancel();
        }
        was_live
    }

    /// Suspend until the task reaches a terminal state or the timeout
    /// elapses, returning the state observed at that moment. A timeout does
    /// not affect the task.
    pub async fn wait_for_completion(&self, id: &str, timeout: Duration) -> Result<TaskState> {
        let entry = self
            .tasks
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CoreError::TaskNotFound { id: id.to_string() })?;

        let mut rx = entry.state_tx.subscribe();
        let wait = rx.wait_for(|state| state.is_terminal());
        let state = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => *state,
            // Sender dropped or timeout: report whatever the record shows.
            Ok(Err(_)) | Err(_) => entry.data.lock().state,
        };
        Ok(state)
    }

    /// Current state of a task.
    pub fn get_state(&self, id: &str) -> Result<TaskState> {
        self.tasks
            .get(id)
            .map(|entry| entry.data.lock().state)
            .ok_or_else(|| CoreError::TaskNotFound { id: id.to_string() })
    }

    /// Terminal result payload. Fails with NotReady while the task is
    /// Pending or Running; a Failed task surfaces its captured error and a
    /// Canceled one reports cancellation.
    pub fn get_result(&self, id: &str) -> Result<serde_json::Value> {
        let entry = self
            .tasks
            .get(id)
            .ok_or_else(|| CoreError::TaskNotFound { id: id.to_string() })?;
        let data = entry.data.lock();
        match data.state {
            TaskState::Completed => Ok(data.result.clone().unwrap_or(serde_json::Value::Null)),
            TaskState::Failed => Err(CoreError::TaskFailed {
                id: id.to_string(),
                message: data.error.clone().unwrap_or_default(),
            }),
            TaskState::Canceled => Err(CoreError::Cancelled),
            TaskState::Pending | TaskState::Running => {
                Err(CoreError::NotReady { id: id.to_string() })
            }
        }
    }

    /// Snapshot of every known task.
    pub fn get_all(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|entry| entry.snapshot()).collect()
    }

    /// Latest progress snapshot for a task.
    pub fn get_progress(&self, id: &str) -> Result<ProgressReport> {
        self.tasks
            .get(id)
            .map(|entry| entry.data.lock().progress)
            .ok_or_else(|| CoreError::TaskNotFound { id: id.to_string() })
    }

    /// Remove a terminal task record. Live tasks cannot be removed.
    pub fn remove(&self, id: &str) -> Result<()> {
        let Some(entry) = self.tasks.get(id) else {
            return Err(CoreError::TaskNotFound { id: id.to_string() });
        };
        if !entry.data.lock().state.is_terminal() {
            return Err(CoreError::Conflict { id: id.to_string() });
        }
        drop(entry);
        self.tasks.remove(id);
        Ok(())
    }

    /// Per-state counts across all known tasks.
    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for entry in self.tasks.iter() {
            match entry.data.lock().state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Canceled => stats.canceled += 1,
                TaskState::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

impl Default for BatchTaskManager {
    fn default() -> Self {
        Self::new(BatchManagerConfig::default())
    }
}
