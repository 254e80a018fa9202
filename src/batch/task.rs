//! Batch task state, progress reporting, and snapshots.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle states of a batch task. Terminal states are final: no
/// transition ever leaves Completed, Canceled, or Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Pending"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Completed => write!(f, "Completed"),
            TaskState::Canceled => write!(f, "Canceled"),
            TaskState::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress snapshot reported by a task body.
///
/// Producers keep `percent_complete` monotonically non-decreasing for a
/// given task; consumers may rely on that for display purposes only, never
/// for correctness.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub items_processed: u64,
    /// Total item count, when known up front.
    pub total: Option<u64>,
    pub percent_complete: f64,
}

impl ProgressReport {
    pub fn new(items_processed: u64, total: Option<u64>) -> Self {
        let percent_complete = match total {
            Some(total) if total > 0 => (items_processed as f64 / total as f64) * 100.0,
            _ => 0.0,
        };
        Self {
            items_processed,
            total,
            percent_complete,
        }
    }
}

/// Callback a task body uses to publish progress.
pub type ProgressSink = Arc<dyn Fn(ProgressReport) + Send + Sync>;

/// Read-only view of one task's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub label: String,
    pub state: TaskState,
    pub progress: ProgressReport,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}
