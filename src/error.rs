//! Crate-level error type and the error category taxonomy shared by the
//! resilience components.

use serde::{Deserialize, Serialize};

/// Errors produced by the orchestration framework itself.
///
/// Component-local error enums (`CircuitBreakerError`, `RetryError`,
/// `LockError`, ...) wrap caller-supplied operation errors generically;
/// `CoreError` covers the framework's own failure modes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// A caller supplied an argument the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Cooperative cancellation was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// A task id is already scheduled and not yet terminal.
    #[error("task '{id}' is already scheduled and still active")]
    Conflict { id: String },

    /// No task is registered under the given id.
    #[error("task '{id}' not found")]
    TaskNotFound { id: String },

    /// The requested result is not available while the task is non-terminal.
    #[error("task '{id}' has not reached a terminal state")]
    NotReady { id: String },

    /// A task body failed; the message carries the captured context.
    #[error("task '{id}' failed: {message}")]
    TaskFailed { id: String, message: String },

    /// A lock acquisition gave up after its timeout.
    #[error("lock acquisition timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    /// The background services host could not bring a poller up.
    #[error("poller '{poller}' failed to start after {attempts} attempts: {message}")]
    PollerStartFailed {
        poller: String,
        attempts: u32,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse error categories used by the policy-dispatch service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// May succeed on retry (timeouts, connectivity).
    Transient,
    /// Logic or validation failure; retrying cannot help.
    NonTransient,
    /// Cooperative cancellation; never retried, never wrapped.
    Cancelled,
    /// Fast-fail from an open circuit; the operation was never invoked.
    CircuitOpen,
    /// Every retry attempt failed.
    RetryExhausted,
    /// Captured into a batch task's terminal state.
    TaskFailed,
    /// A lock acquisition timed out.
    LockTimeout,
    /// Nothing more specific applies.
    Unknown,
}

/// Broad grouping used as the fallback tier in policy resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryGroup {
    /// Retrying may change the outcome.
    Retryable,
    /// The outcome is settled; retrying cannot change it.
    Terminal,
}

impl ErrorCategory {
    pub fn group(&self) -> CategoryGroup {
        match self {
            ErrorCategory::Transient | ErrorCategory::LockTimeout | ErrorCategory::Unknown => {
                CategoryGroup::Retryable
            }
            ErrorCategory::NonTransient
            | ErrorCategory::Cancelled
            | ErrorCategory::CircuitOpen
            | ErrorCategory::RetryExhausted
            | ErrorCategory::TaskFailed => CategoryGroup::Terminal,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::NonTransient => write!(f, "NonTransient"),
            ErrorCategory::Cancelled => write!(f, "Cancelled"),
            ErrorCategory::CircuitOpen => write!(f, "CircuitOpen"),
            ErrorCategory::RetryExhausted => write!(f, "RetryExhausted"),
            ErrorCategory::TaskFailed => write!(f, "TaskFailed"),
            ErrorCategory::LockTimeout => write!(f, "LockTimeout"),
            ErrorCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

impl CoreError {
    /// Category used when this error is routed through the policy dispatch.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::InvalidArgument(_) => ErrorCategory::NonTransient,
            CoreError::Cancelled => ErrorCategory::Cancelled,
            CoreError::Conflict { .. }
            | CoreError::TaskNotFound { .. }
            | CoreError::NotReady { .. } => ErrorCategory::NonTransient,
            CoreError::TaskFailed { .. } => ErrorCategory::TaskFailed,
            CoreError::LockTimeout { .. } => ErrorCategory::LockTimeout,
            CoreError::PollerStartFailed { .. } => ErrorCategory::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_group_by_retryability() {
        assert_eq!(ErrorCategory::Transient.group(), CategoryGroup::Retryable);
        assert_eq!(ErrorCategory::LockTimeout.group(), CategoryGroup::Retryable);
        assert_eq!(ErrorCategory::Cancelled.group(), CategoryGroup::Terminal);
        assert_eq!(
            ErrorCategory::RetryExhausted.group(),
            CategoryGroup::Terminal
        );
    }

    #[test]
    fn core_errors_map_to_their_categories() {
        let err = CoreError::Conflict {
            id: "import".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::NonTransient);
        assert_eq!(CoreError::Cancelled.category(), ErrorCategory::Cancelled);

        let err = CoreError::TaskFailed {
            id: "import".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::TaskFailed);
    }
}
