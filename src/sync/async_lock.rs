//! Exclusive async lock with scoped, idempotently releasable guards.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// Errors from cancellable lock acquisition.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The cancellation token fired while waiting for the lock.
    #[error("lock acquisition cancelled")]
    Cancelled,
}

/// A cooperative mutual-exclusion lock.
///
/// Built on a one-permit FIFO semaphore: waiters suspend instead of blocking
/// a worker thread, and are granted the lock in arrival order. The returned
/// guard releases on drop; [`AsyncLockGuard::release`] may additionally be
/// called any number of times without double-releasing.
#[derive(Debug, Clone)]
pub struct AsyncLock {
    semaphore: Arc<Semaphore>,
}

impl AsyncLock {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Suspend until exclusive access is granted.
    pub async fn acquire(&self) -> AsyncLockGuard {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("lock semaphore is never closed");
        AsyncLockGuard {
            permit: Some(permit),
        }
    }

    /// Try to acquire without waiting at all.
    pub fn try_acquire(&self) -> Option<AsyncLockGuard> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(AsyncLockGuard {
                permit: Some(permit),
            }),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => None,
        }
    }

    /// Acquire with a deadline. Returns `None` on timeout; a timed-out wait
    /// never consumes the permit.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Option<AsyncLockGuard> {
        tokio::time::timeout(timeout, self.acquire()).await.ok()
    }

    /// Acquire unless the token fires first. A cancelled wait never consumes
    /// the permit.
    pub async fn acquire_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<AsyncLockGuard, LockError> {
        tokio::select! {
            guard = self.acquire() => Ok(guard),
            _ = token.cancelled() => Err(LockError::Cancelled),
        }
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped handle to an [`AsyncLock`]. Dropping it releases the lock;
/// explicit release is idempotent.
#[derive(Debug)]
pub struct AsyncLockGuard {
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl AsyncLockGuard {
    /// Release the lock now. Safe to call repeatedly; only the first call
    /// has an effect, and a later drop releases nothing further.
    pub fn release(&mut self) {
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn two_acquirers_never_hold_the_lock_simultaneously() {
        let lock = AsyncLock::new();
        let inside = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            let overlaps = overlaps.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let guard = lock.acquire().await;
                    if inside.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                    inside.store(false, Ordering::SeqCst);
                    drop(guard);
                }
            }));
        }
        for handle in handles {
            handle.await.expect("worker finished");
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn double_release_is_idempotent() {
        let lock = AsyncLock::new();

        let mut guard = lock.acquire().await;
        guard.release();
        guard.release();
        drop(guard);

        // A third acquirer still sees a consistent lock.
        let mut guard = lock.acquire().await;
        guard.release();
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn timeout_returns_none_without_consuming_the_permit() {
        let lock = AsyncLock::new();
        let held = lock.acquire().await;

        let waited = lock.acquire_timeout(Duration::from_millis(20)).await;
        assert!(waited.is_none());

        drop(held);
        assert!(lock
            .acquire_timeout(Duration::from_millis(20))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let lock = AsyncLock::new();
        let _held = lock.acquire().await;

        let token = CancellationToken::new();
        token.cancel();
        let result = lock.acquire_cancellable(&token).await;
        assert!(matches!(result, Err(LockError::Cancelled)));
    }
}
