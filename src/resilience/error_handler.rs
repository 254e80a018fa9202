//! Central error-policy dispatch: category to action resolution, bounded
//! error history, and error events.

use crate::error::{CategoryGroup, CoreError, ErrorCategory};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Action a caller should take for a handled error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Retry the failed operation.
    Retry,
    /// Substitute a default value and continue.
    UseDefault,
    /// Let the error propagate to the caller.
    Propagate,
}

/// A handled error as recorded into the history buffer and emitted as an
/// event.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub message: String,
    pub category: ErrorCategory,
    pub source: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub action: ErrorAction,
}

/// Policy registry and dispatch point for errors from arbitrarily many
/// concurrent callers.
///
/// Resolution is most-specific-first: an exact category policy wins, then a
/// policy for the category's group (retryable / terminal), then the default
/// action (Propagate).
#[derive(Debug)]
pub struct ErrorHandlingService {
    category_policies: DashMap<ErrorCategory, ErrorAction>,
    group_policies: DashMap<CategoryGroup, ErrorAction>,
    history: Mutex<VecDeque<ErrorRecord>>,
    history_capacity: usize,
    events: broadcast::Sender<ErrorRecord>,
}

impl ErrorHandlingService {
    pub fn new(history_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            category_policies: DashMap::new(),
            group_policies: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            events,
        }
    }

    /// Register the action for an exact error category.
    pub fn register_policy(&self, category: ErrorCategory, action: ErrorAction) {
        self.category_policies.insert(category, action);
    }

    /// Register the fallback action for a whole category group.
    pub fn register_group_policy(&self, group: CategoryGroup, action: ErrorAction) {
        self.group_policies.insert(group, action);
    }

    /// Subscribe to error events.
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorRecord> {
        self.events.subscribe()
    }

    /// Handle a framework error: record it, emit an event, and return the
    /// resolved action.
    pub fn handle(&self, error: &CoreError, source: &str) -> ErrorAction {
        self.handle_category(error.category(), &error.to_string(), source)
    }

    /// Handle an error that has already been categorized (e.g. one from an
    /// external collaborator).
    pub fn handle_category(
        &self,
        category: ErrorCategory,
        message: &str,
        source: &str,
    ) -> ErrorAction {
        let action = self.resolve(category);

        let record = ErrorRecord {
            message: message.to_string(),
            category,
            source: source.to_string(),
            timestamp: chrono::Utc::now(),
            action,
        };

        if self.history_capacity > 0 {
            let mut history = self.history.lock();
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(record.clone());
        }

        match action {
            ErrorAction::Propagate => {
                warn!(source, %category, message, "error propagated")
            }
            _ => debug!(source, %category, message, action = ?action, "error handled"),
        }

        // Nobody listening is fine; events are best-effort.
        let _ = self.events.send(record);

        action
    }

    /// Snapshot of the most recent handled errors, newest last.
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let history = self.history.lock();
        history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    fn resolve(&self, category: ErrorCategory) -> ErrorAction {
        if let Some(action) = self.category_policies.get(&category) {
            return *action;
        }
        if let Some(action) = self.group_policies.get(&category.group()) {
            return *action;
        }
        ErrorAction::Propagate
    }
}

impl Default for ErrorHandlingService {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_categories_default_to_propagate() {
        let service = ErrorHandlingService::default();
        let action = service.handle_category(ErrorCategory::Unknown, "mystery", "test");
        assert_eq!(action, ErrorAction::Propagate);
    }

    #[test]
    fn exact_category_policy_wins_over_group_policy() {
        let service = ErrorHandlingService::default();
        service.register_group_policy(CategoryGroup::Retryable, ErrorAction::Retry);
        service.register_policy(ErrorCategory::LockTimeout, ErrorAction::UseDefault);

        // LockTimeout is in the retryable group but has an exact policy.
        assert_eq!(
            service.handle_category(ErrorCategory::LockTimeout, "timed out", "cache"),
            ErrorAction::UseDefault
        );
        // Transient falls through to the group policy.
        assert_eq!(
            service.handle_category(ErrorCategory::Transient, "flaky", "network"),
            ErrorAction::Retry
        );
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let service = ErrorHandlingService::new(3);
        for i in 0..5 {
            service.handle_category(ErrorCategory::Transient, &format!("error {i}"), "test");
        }

        let recent = service.recent_errors(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "error 2");
        assert_eq!(recent[2].message, "error 4");
    }

    #[test]
    fn zero_capacity_keeps_no_history() {
        let service = ErrorHandlingService::new(0);
        for i in 0..10 {
            service.handle_category(ErrorCategory::Transient, &format!("error {i}"), "test");
        }
        assert!(service.recent_errors(10).is_empty());
    }

    #[test]
    fn framework_errors_are_categorized_through_handle() {
        let service = ErrorHandlingService::default();
        service.register_policy(ErrorCategory::TaskFailed, ErrorAction::UseDefault);

        let error = CoreError::TaskFailed {
            id: "import".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(service.handle(&error, "manager"), ErrorAction::UseDefault);
    }

    #[tokio::test]
    async fn handled_errors_are_emitted_as_events() {
        let service = ErrorHandlingService::default();
        let mut events = service.subscribe();

        service.handle_category(ErrorCategory::Transient, "socket reset", "poller");

        let record = events.recv().await.expect("event received");
        assert_eq!(record.category, ErrorCategory::Transient);
        assert_eq!(record.source, "poller");
    }

    #[tokio::test]
    async fn concurrent_handling_is_safe() {
        let service = std::sync::Arc::new(ErrorHandlingService::new(100));

        let mut handles = Vec::new();
        for worker in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    service.handle_category(
                        ErrorCategory::Transient,
                        &format!("worker {worker} error {i}"),
                        "stress",
                    );
                }
            }));
        }
        for handle in handles {
            handle.await.expect("worker finished");
        }

        assert_eq!(service.recent_errors(1_000).len(), 100);
    }
}
